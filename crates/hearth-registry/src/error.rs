//! Errors raised by the service & route registry.

use hearth_proto::ErrorKind;
use thiserror::Error;

/// Result alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by [`crate::Registry`].
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] hearth_store::Error),

    /// A lookup found no matching row.
    #[error("not found: {0}")]
    NotFound(String),

    /// The TCP port range configured for service routes is exhausted.
    #[error("no-ports-available")]
    NoPortsAvailable,

    /// A request would violate a uniqueness invariant.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl Error {
    /// Map this error onto the wire-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Store(e) => e.kind(),
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::NoPortsAvailable => ErrorKind::Internal,
            Error::Conflict(_) => ErrorKind::Conflict,
        }
    }
}
