//! Errors raised by the privileged helper.

use hearth_proto::ErrorKind;
use thiserror::Error;

/// Result alias for helper operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating or executing a [`hearth_proto::HelperRequest`].
#[derive(Error, Debug)]
pub enum Error {
    /// A request failed an allow-list check.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The underlying command or filesystem operation failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map this error onto the wire-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Execution(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }
}
