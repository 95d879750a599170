//! Errors raised by the composition root itself (auth, config, session
//! accept loop). Deployment-pipeline errors are `hearth_deployer::Error` and
//! pass through unchanged — see [`crate::sessions::SessionRegistry`].

use thiserror::Error;

/// Result alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised outside the deployer's own pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] hearth_store::Error),

    /// Underlying registry failure.
    #[error(transparent)]
    Registry(#[from] hearth_registry::Error),

    /// Configuration is missing a value required in production, or a
    /// supplied value failed validation.
    #[error("configuration: {0}")]
    Config(String),

    /// No row matching the lookup (user, token, server).
    #[error("not found: {0}")]
    NotFound(String),

    /// Username already taken, or similar uniqueness violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hashing(String),

    /// YAML config file could not be parsed.
    #[error("config file: {0}")]
    ConfigFile(String),
}
