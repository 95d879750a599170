//! Errors raised by the dependency resolver.

use hearth_proto::ErrorKind;
use thiserror::Error;

/// Result alias for resolver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by [`crate::resolve`].
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying registry failure.
    #[error(transparent)]
    Registry(#[from] hearth_registry::Error),

    /// `userConfig` failed schema validation.
    #[error("validation: {0}")]
    Validation(String),

    /// A required (non-optional) dependency has no provider.
    #[error("missing required service: {0}")]
    MissingRequired(String),
}

impl Error {
    /// Map this error onto the wire-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Registry(e) => e.kind(),
            Error::Validation(_) => ErrorKind::Validation,
            Error::MissingRequired(_) => ErrorKind::Validation,
        }
    }
}
