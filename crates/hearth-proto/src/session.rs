//! Frames exchanged over the persistent orchestrator↔agent session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::{AgentCommand, CommandAck, CommandResult};

/// Handshake payload the agent presents on connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionAuth {
    /// The server id this agent claims to be.
    pub server_id: Uuid,
    /// Opaque bearer token; the orchestrator compares its hash constant-time.
    pub token: String,
}

/// Frames the orchestrator sends to a connected agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Dispatch a command for execution.
    Command {
        /// The command to execute.
        #[serde(flatten)]
        cmd: AgentCommand,
    },
    /// The orchestrator is shutting down this session; begin draining.
    ServerShutdown,
    /// Ask the agent to emit a status report immediately.
    RequestStatus,
    /// Heartbeat; the agent must answer with `pong`.
    Ping,
}

/// Frames an agent sends to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Periodic or on-demand status report.
    Status {
        /// The report body.
        #[serde(flatten)]
        report: AgentStatusReport,
    },
    /// Acknowledgement that a command was received.
    CommandAck {
        /// The ack body.
        #[serde(flatten)]
        ack: CommandAck,
    },
    /// Final outcome of a command.
    CommandResult {
        /// The result body.
        #[serde(flatten)]
        result: CommandResult,
    },
    /// Result of a `getLogs` request.
    LogsResult {
        /// Id of the `getLogs` command this answers.
        command_id: Uuid,
        /// Log lines returned, oldest first.
        lines: Vec<String>,
    },
    /// A single streamed log line.
    LogsStreamLine {
        /// Stream id, equal to the originating command id.
        stream_id: Uuid,
        /// The line content.
        line: String,
    },
    /// Terminal or state-change frame for a log stream.
    LogsStreamStatus {
        /// Stream id, equal to the originating command id.
        stream_id: Uuid,
        /// Current stream state.
        status: LogStreamStatus,
        /// Detail, e.g. an error message, when `status == error`.
        #[serde(default)]
        message: Option<String>,
    },
    /// Answer to a `ping` heartbeat.
    Pong,
}

/// Lifecycle state of an agent-side log stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogStreamStatus {
    /// The stream has begun.
    Started,
    /// The stream ended normally.
    Stopped,
    /// The stream ended abnormally; `message` carries detail.
    Error,
}

/// Periodic status report an agent emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStatusReport {
    /// The reporting server's id.
    pub server_id: Uuid,
    /// When the report was produced.
    pub timestamp: DateTime<Utc>,
    /// Resource usage metrics.
    pub metrics: Metrics,
    /// Optional free-form network info (interfaces, addresses).
    #[serde(default)]
    pub network_info: Option<serde_json::Value>,
    /// Per-app observed status.
    pub apps: Vec<AppStatus>,
}

/// Resource usage metrics reported alongside a status report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metrics {
    /// CPU utilization, 0.0-100.0.
    pub cpu_percent: f64,
    /// Memory in use, bytes.
    pub memory_used: u64,
    /// Total memory, bytes.
    pub memory_total: u64,
    /// Disk space in use, bytes.
    pub disk_used: u64,
    /// Total disk space, bytes.
    pub disk_total: u64,
    /// 1/5/15-minute load averages.
    pub load_average: [f64; 3],
}

/// An app's observed run state, as seen by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppStatus {
    /// App (manifest) name.
    pub name: String,
    /// Observed status.
    pub status: ObservedAppStatus,
}

/// Observed run state of an app on a host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ObservedAppStatus {
    /// Service unit is active.
    Running,
    /// Service unit exists but is not active.
    Stopped,
    /// No app directory/unit found on the host.
    NotInstalled,
    /// Service unit failed.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_tags_correctly() {
        let json = serde_json::to_string(&ServerEvent::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn agent_event_pong_roundtrips() {
        let json = serde_json::to_string(&AgentEvent::Pong).unwrap();
        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AgentEvent::Pong);
    }
}
