//! Command envelope exchanged over the agent session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A command sent from the orchestrator to an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentCommand {
    /// Opaque id correlating ack/result frames back to this command.
    pub id: Uuid,
    /// The action to perform.
    pub action: Action,
    /// App this command targets, when the action is app-scoped.
    #[serde(default)]
    pub app_name: Option<String>,
    /// Action-specific payload.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// The closed set of actions an agent accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Materialize an app install on the host.
    Install,
    /// Re-render config and optionally re-run a configure script.
    Configure,
    /// Start the app's service.
    Start,
    /// Stop the app's service.
    Stop,
    /// Restart the app's service.
    Restart,
    /// Remove the app and its files.
    Uninstall,
    /// Fetch a bounded tail of logs.
    GetLogs,
    /// Begin streaming logs.
    StreamLogs,
    /// Stop a log stream.
    StopStreamLogs,
    /// Mount a storage volume.
    MountStorage,
    /// Unmount a storage volume.
    UnmountStorage,
    /// Check whether a mount point is currently mounted.
    CheckMount,
    /// Apply a keepalived configuration for HA.
    ConfigureKeepalived,
    /// Check keepalived's current state.
    CheckKeepalived,
}

/// Acknowledgement that a command was received, sent before execution begins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandAck {
    /// The command this ack corresponds to.
    pub command_id: Uuid,
    /// When the agent received the command.
    pub received_at: DateTime<Utc>,
}

/// The result of executing a command, sent after execution completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    /// The command this result corresponds to.
    pub command_id: Uuid,
    /// Outcome of the command.
    pub status: CommandOutcome,
    /// Human-readable detail, e.g. an error message. Never contains secrets.
    #[serde(default)]
    pub message: Option<String>,
    /// Wall-clock duration of execution, in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Action-specific result data.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Outcome of a [`CommandResult`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The command completed successfully.
    Success,
    /// The command failed; `message` carries detail.
    Error,
}

impl CommandResult {
    /// Build a success result with no additional data.
    pub fn success(command_id: Uuid) -> Self {
        Self {
            command_id,
            status: CommandOutcome::Success,
            message: None,
            duration_ms: None,
            data: None,
        }
    }

    /// Build an error result carrying a message.
    pub fn error(command_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            command_id,
            status: CommandOutcome::Error,
            message: Some(message.into()),
            duration_ms: None,
            data: None,
        }
    }

    /// Whether this result indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self.status, CommandOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_error_constructors() {
        let id = Uuid::new_v4();
        assert!(CommandResult::success(id).is_success());
        let err = CommandResult::error(id, "disk full");
        assert!(!err.is_success());
        assert_eq!(err.message.as_deref(), Some("disk full"));
    }

    #[test]
    fn action_serializes_camel_case() {
        let json = serde_json::to_string(&Action::StreamLogs).unwrap();
        assert_eq!(json, "\"streamLogs\"");
    }
}
