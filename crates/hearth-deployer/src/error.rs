//! Errors raised by the deployer.

use hearth_proto::ErrorKind;
use thiserror::Error;

/// Result alias for deployer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by [`crate::Deployer`] and [`crate::bootstrap`].
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] hearth_store::Error),

    /// Underlying registry failure.
    #[error(transparent)]
    Registry(#[from] hearth_registry::Error),

    /// Underlying resolver failure.
    #[error(transparent)]
    Resolver(#[from] hearth_resolver::Error),

    /// Underlying proxy manager failure.
    #[error(transparent)]
    Proxy(#[from] hearth_proxy::Error),

    /// Bad input: unknown manifest, missing required field, schema mismatch.
    #[error("validation: {0}")]
    Validation(String),

    /// No row matching the lookup.
    #[error("not found: {0}")]
    NotFound(String),

    /// Singleton/conflict/duplicate-(server,app) violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The target server has no live agent session.
    #[error("agent disconnected: server {0}")]
    AgentDisconnected(uuid::Uuid),

    /// The agent reported failure for a dispatched command.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// Template rendering failed.
    #[error("template rendering failed: {0}")]
    Template(String),

    /// Secret encryption/decryption failed.
    #[error("secret crypto failed: {0}")]
    Crypto(String),

    /// Unclassified failure; the deployment goes to `error`.
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error onto the wire-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Store(e) => e.kind(),
            Error::Registry(e) => e.kind(),
            Error::Resolver(e) => e.kind(),
            Error::Proxy(e) => e.kind(),
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::AgentDisconnected(_) => ErrorKind::AgentDisconnected,
            Error::CommandFailed(_) => ErrorKind::CommandFailed,
            Error::Template(_) | Error::Crypto(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a caller may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
