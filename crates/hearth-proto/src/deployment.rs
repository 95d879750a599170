//! Deployment rows: a concrete installation of a manifest on a server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manifest::UserConfig;

/// A concrete installation of an app manifest on a specific server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    /// Opaque deployment id.
    pub id: Uuid,
    /// The server this deployment lives on.
    pub server_id: Uuid,
    /// The manifest name this deployment installs.
    pub app_name: String,
    /// Groups deployments created together (e.g. by a bundle install).
    #[serde(default)]
    pub group_id: Option<Uuid>,
    /// Manifest version installed.
    pub version: String,
    /// Resolved configuration values, post config-schema resolution.
    pub config: UserConfig,
    /// Current lifecycle status.
    pub status: DeploymentStatus,
    /// Human-readable detail for the current status, e.g. an error message.
    #[serde(default)]
    pub status_message: Option<String>,
    /// When the deployment row was first created.
    pub installed_at: DateTime<Utc>,
    /// When the deployment row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle states of a [`Deployment`].
///
/// ```text
///  installing ──ok──▶ running ◀──start── stopped
///      │ fail           │                  ▲
///      ▼                ├──stop───────────┘
///    (deleted)          │
///                       ▼
///                  configuring ──ok──▶ running
///                       │
///                       ▼
///                     error
/// ```
/// Any state may transition to `uninstalling` then to deletion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Row created, install pipeline has not yet produced a running service.
    Pending,
    /// Install pipeline is in flight.
    Installing,
    /// Configure pipeline is in flight.
    Configuring,
    /// Service is started and its route is active.
    Running,
    /// Service is stopped and its route is inactive.
    Stopped,
    /// Uninstall pipeline is in flight.
    Uninstalling,
    /// A step failed; `status_message` carries detail.
    Error,
}

impl DeploymentStatus {
    /// Whether the deployment is in a terminal, non-error state that should
    /// have exactly one corresponding service row per `provides` entry.
    pub fn is_terminal_non_error(self) -> bool {
        matches!(self, DeploymentStatus::Running | DeploymentStatus::Stopped)
    }
}

impl Deployment {
    /// Construct a new deployment row in `pending` status.
    pub fn new(server_id: Uuid, app_name: impl Into<String>, version: impl Into<String>, config: UserConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            server_id,
            app_name: app_name.into(),
            group_id: None,
            version: version.into(),
            config,
            status: DeploymentStatus::Pending,
            status_message: None,
            installed_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn new_deployment_is_pending() {
        let d = Deployment::new(Uuid::new_v4(), "demo", "1.0", HashMap::new());
        assert_eq!(d.status, DeploymentStatus::Pending);
        assert!(!d.status.is_terminal_non_error());
    }

    #[test]
    fn running_and_stopped_are_terminal_non_error() {
        assert!(DeploymentStatus::Running.is_terminal_non_error());
        assert!(DeploymentStatus::Stopped.is_terminal_non_error());
        assert!(!DeploymentStatus::Error.is_terminal_non_error());
        assert!(!DeploymentStatus::Installing.is_terminal_non_error());
    }
}
