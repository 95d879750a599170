//! At-rest secret storage for a deployment's generated config values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An encrypted blob of a deployment's secret config values.
///
/// Exactly one per deployment; cascades with it; the ciphertext is never
/// logged and `Debug` deliberately does not print it.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretBlob {
    /// The deployment this secret belongs to.
    pub deployment_id: Uuid,
    /// Encrypted payload (opaque to every component except the secrets store).
    pub ciphertext: Vec<u8>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-write timestamp.
    pub updated_at: DateTime<Utc>,
    /// Timestamp of the last rotation, if any.
    #[serde(default)]
    pub rotated_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for SecretBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBlob")
            .field("deployment_id", &self.deployment_id)
            .field("ciphertext", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("rotated_at", &self.rotated_at)
            .finish()
    }
}
