pub mod executor;
pub mod launch;
pub mod preflight;
pub mod process;

pub use executor::SequenceExecutor;
pub use launch::{LaunchMode, ServerLauncher};
pub use preflight::preflight;
pub use process::{resolve_program, OutputMode, ProcessConfig};
