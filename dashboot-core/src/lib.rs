pub mod error;
pub mod models;
pub mod variants;

pub use error::{DashbootError, Result};
pub use models::*;
pub use variants::Variant;
