//! Errors raised by the agent-side executor.

use hearth_proto::ErrorKind;
use thiserror::Error;

/// Result alias for executor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by [`crate::Executor`].
#[derive(Error, Debug)]
pub enum Error {
    /// A path fell outside the configured sandbox.
    #[error("path outside sandbox: {0}")]
    PathNotAllowed(String),

    /// Underlying filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A spawned script or helper call failed.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// A log stream id was not found when stopping it.
    #[error("no such log stream: {0}")]
    NoSuchStream(uuid::Uuid),
}

impl Error {
    /// Map this error onto the wire-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PathNotAllowed(_) => ErrorKind::Validation,
            Error::Io(_) => ErrorKind::Internal,
            Error::CommandFailed(_) => ErrorKind::CommandFailed,
            Error::NoSuchStream(_) => ErrorKind::NotFound,
        }
    }
}
