use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashbootError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Port variable {0} is not set")]
    MissingPort(String),

    #[error("Invalid port {value:?} in {variable}")]
    InvalidPort { variable: String, value: String },

    #[error("Program not found on PATH: {0}")]
    ProgramNotFound(String),

    #[error("Failed to launch server: {0}")]
    LaunchFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DashbootError>;
