// Per-invocation process setup

use dashboot_core::{DashbootError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Where a child's stdio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Share the sequencer's stdin, stdout and stderr
    #[default]
    Inherit,
    /// Collect output into the step result; stdin is closed
    Capture,
}

impl OutputMode {
    pub fn inherits_stdin(&self) -> bool {
        matches!(self, OutputMode::Inherit)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    pub env: Vec<(String, String)>,
    pub working_directory: Option<PathBuf>,
    pub output: OutputMode,
}

impl ProcessConfig {
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Build the child command. Overrides apply to the child only.
    pub fn command(&self, program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }

        if self.output.inherits_stdin() {
            cmd.stdin(Stdio::inherit());
        } else {
            cmd.stdin(Stdio::null());
        }

        match self.output {
            OutputMode::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            OutputMode::Capture => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        cmd
    }
}

/// Locate `program` the way a shell would, relative to `work_dir` for
/// paths containing a separator.
pub fn resolve_program(program: &str, work_dir: Option<&Path>) -> Result<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        let path = match work_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        };
        return if path.is_file() {
            Ok(path)
        } else {
            Err(DashbootError::ProgramNotFound(program.to_string()))
        };
    }

    which::which(program).map_err(|_| DashbootError::ProgramNotFound(program.to_string()))
}
