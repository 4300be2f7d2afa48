use crate::terminal::model::TerminalId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    StdIoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] anyhow::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Terminal not found for ID: {0}")]
    TerminalNotFound(TerminalId),

    #[error("Terminal surface for ID {0} is no longer available")]
    SurfaceGone(TerminalId),

    #[error("Terminal {0} is not a remote session")]
    NotRemote(TerminalId),

    #[error("Terminal {0} is processing an exit event")]
    TerminalClosing(TerminalId),

    #[error("A retry is already in progress for terminal {0}")]
    RetryInProgress(TerminalId),

    #[error("Spawn error: {0}")]
    SpawnError(String),

    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("Process {0} no longer exists")]
    ProcessGone(u32),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Invalid input argument: {0}")]
    InvalidInputArgument(String),

    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),
}

impl AppError {
    /// Errors that mean the target process is already gone, which callers
    /// usually treat as "nothing left to do".
    pub fn is_process_gone(&self) -> bool {
        matches!(self, AppError::ProcessGone(_))
    }
}
