//! Error kind taxonomy shared across the wire and audit log.

use serde::{Deserialize, Serialize};

/// Error kinds carried on the wire and in audit records.
///
/// Each crate defines its own `thiserror` error type; most expose a
/// `kind() -> ErrorKind` accessor so callers at a boundary can make a
/// recovery decision without matching every concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Bad input or schema mismatch. Reject at the boundary; no side effects.
    Validation,
    /// Missing row (deployment/app/server/mount). Idempotent cleanup may continue.
    NotFound,
    /// Singleton violated, duplicate, or conflicting app. Reject; no changes.
    Conflict,
    /// Target server has no live session. Retryable by the caller.
    AgentDisconnected,
    /// Agent reported failure. Triggers compensation; surface the message.
    CommandFailed,
    /// Admin API push failed. Circuit logic applies; last-known-good is kept.
    ProxyUpdateFailed,
    /// Helper rejected the request by allow-list. Fatal for the step.
    PrivilegeDenied,
    /// Store busy / lock contention. Bounded retry with backoff.
    Busy,
    /// Unhandled. Log + audit; deployment goes to `error`.
    Internal,
}

impl ErrorKind {
    /// Whether a caller may retry the operation as-is.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::AgentDisconnected | ErrorKind::Busy)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::AgentDisconnected => "AGENT_DISCONNECTED",
            ErrorKind::CommandFailed => "COMMAND_FAILED",
            ErrorKind::ProxyUpdateFailed => "PROXY_UPDATE_FAILED",
            ErrorKind::PrivilegeDenied => "PRIVILEGE_DENIED",
            ErrorKind::Busy => "BUSY",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}
