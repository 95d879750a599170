//! Errors raised by the proxy manager.

use hearth_proto::ErrorKind;
use thiserror::Error;

/// Result alias for proxy manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by [`crate::ProxyManager`].
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying registry failure while gathering routes.
    #[error(transparent)]
    Registry(#[from] hearth_registry::Error),

    /// The admin API push failed after exhausting its retry budget.
    #[error("proxy admin API push failed: {0}")]
    PushFailed(String),

    /// The circuit is open; pushes are suppressed until recovery.
    #[error("proxy circuit is open, last failure: {0}")]
    CircuitOpen(String),
}

impl Error {
    /// Map this error onto the wire-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Registry(e) => e.kind(),
            Error::PushFailed(_) | Error::CircuitOpen(_) => ErrorKind::ProxyUpdateFailed,
        }
    }
}
