//! Operator accounts and per-agent bearer tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An operator account able to authenticate against the CLI/API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Opaque user id.
    pub id: Uuid,
    /// Login name, unique.
    pub username: String,
    /// bcrypt password hash. Never the plaintext password.
    pub password_hash: String,
    /// Authorization role.
    pub role: UserRole,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

/// Authorization role of a [`User`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Full read/write access.
    Admin,
    /// Read-only access.
    Viewer,
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "viewer" => Ok(UserRole::Viewer),
            other => Err(format!("unknown role '{other}', expected admin|viewer")),
        }
    }
}

/// A bearer token minted for one server's agent to authenticate its session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentToken {
    /// Opaque token id (distinct from the token value itself).
    pub id: Uuid,
    /// The server this token authenticates.
    pub server_id: Uuid,
    /// SHA-256 hash of the token, compared constant-time at handshake.
    pub token_hash: String,
    /// When the token was minted.
    pub created_at: DateTime<Utc>,
    /// When the token was revoked, if it has been.
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AgentToken {
    /// Whether this token may still authenticate a session.
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}
