//! Audit trail for deployer operations.
//!
//! One append-only row per significant event; never includes secret values.

use chrono::{DateTime, Utc};
use hearth_store::migrations::Migration;
use hearth_store::Tree;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// The `audit` tree isn't part of the store's base schema; callers opening
/// a [`hearth_store::Store`] for the deployer should pass this alongside
/// their own extra migrations.
pub fn migration() -> Migration {
    Migration {
        version: 2,
        description: "bootstrap the deployer's audit trail tree",
        apply: |db| {
            db.open_tree("audit").map(|_| ()).map_err(|e| e.to_string())
        },
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    /// Opaque record id.
    pub id: Uuid,
    /// When the event was recorded.
    pub at: DateTime<Utc>,
    /// Short machine-readable event name, e.g. `"install"`, `"uninstall.failed"`.
    pub event: String,
    /// The deployment this event concerns, if any.
    pub deployment_id: Option<Uuid>,
    /// The server this event concerns, if any.
    pub server_id: Option<Uuid>,
    /// App name, if any.
    pub app_name: Option<String>,
    /// Free-form, secret-free detail.
    pub message: String,
}

/// Append-only audit log.
pub struct AuditLog {
    tree: Tree<AuditEvent>,
}

impl AuditLog {
    /// Open the audit log over its tree.
    pub fn new(tree: Tree<AuditEvent>) -> Self {
        Self { tree }
    }

    /// Record one event. Never fails the caller's operation: write errors
    /// are logged and swallowed rather than propagated, the same posture
    /// compensating actions take.
    pub fn record(
        &self,
        event: impl Into<String>,
        deployment_id: Option<Uuid>,
        server_id: Option<Uuid>,
        app_name: Option<&str>,
        message: impl Into<String>,
    ) {
        let record = AuditEvent {
            id: Uuid::new_v4(),
            at: Utc::now(),
            event: event.into(),
            deployment_id,
            server_id,
            app_name: app_name.map(str::to_string),
            message: message.into(),
        };
        if let Err(e) = self.tree.put(record.id.as_bytes(), &record) {
            tracing::warn!(error = %e, event = %record.event, "failed to write audit record");
        }
    }

    /// Every recorded event, oldest first by insertion (sled key order is
    /// insertion order here since ids are random; callers sort by `at`).
    pub fn all(&self) -> Result<Vec<AuditEvent>> {
        let mut events = self.tree.scan()?;
        events.sort_by_key(|e| e.at);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_store::Store;

    #[test]
    fn records_are_retrievable_in_chronological_order() {
        let store = Store::temporary(&[migration()]).unwrap();
        let log = AuditLog::new(store.tree("audit").unwrap());
        log.record("install", Some(Uuid::new_v4()), None, Some("demo"), "installed ok");
        log.record("uninstall", Some(Uuid::new_v4()), None, Some("demo"), "removed");
        let events = log.all().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].at <= events[1].at);
    }
}
