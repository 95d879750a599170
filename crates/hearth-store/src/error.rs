//! Error types for the store.

use hearth_proto::ErrorKind;
use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the store.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying sled database error.
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    /// A transaction was aborted after exhausting its retry budget.
    #[error("transaction busy: {0}")]
    Busy(String),

    /// Serialization/deserialization of a row failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row expected to exist was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A migration could not be applied.
    #[error("migration {version} failed: {reason}")]
    Migration {
        /// Schema version the failing migration would have produced.
        version: u32,
        /// Why it failed.
        reason: String,
    },
}

impl Error {
    /// Map this error onto the wire-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Database(_) => ErrorKind::Internal,
            Error::Busy(_) => ErrorKind::Busy,
            Error::Serialization(_) => ErrorKind::Internal,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Migration { .. } => ErrorKind::Internal,
        }
    }
}
