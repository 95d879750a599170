//! Errors raised by the agent session transport.

use hearth_proto::ErrorKind;
use thiserror::Error;

/// Result alias for agent-session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by [`crate::client::AgentSession`] and
/// [`crate::connection::AgentConnection`].
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to establish the underlying transport connection.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The session protocol was violated (unexpected frame, bad auth, ...).
    #[error("session error: {0}")]
    Session(String),

    /// The session is draining and rejects new commands.
    #[error("Agent is shutting down")]
    Draining,

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map this error onto the wire-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) => ErrorKind::AgentDisconnected,
            Error::Session(_) => ErrorKind::Internal,
            Error::Draining => ErrorKind::Busy,
            Error::Io(_) => ErrorKind::Internal,
        }
    }
}
