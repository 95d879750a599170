//! Server records: the hosts making up the fleet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A host in the fleet, running exactly one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Server {
    /// Opaque server id.
    pub id: Uuid,
    /// Operator-facing name.
    pub name: String,
    /// Reachable address, if known (core server may omit it, being loopback).
    #[serde(default)]
    pub host: Option<String>,
    /// Whether this is the orchestrator's own host. Exactly one server has this set.
    pub is_core: bool,
    /// Current session state as observed by the orchestrator.
    pub agent_status: AgentStatus,
    /// SHA-256 hash of the agent auth token, never the token itself.
    #[serde(default)]
    pub auth_token_hash: Option<String>,
    /// Most recent metrics snapshot reported by the agent.
    #[serde(default)]
    pub metrics: Option<crate::session::Metrics>,
    /// Optional free-form network info reported by the agent.
    #[serde(default)]
    pub network_info: Option<serde_json::Value>,
    /// Timestamp of the last received frame on this server's session.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Session state of a server's agent, as observed by the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// A session is established and the agent is responsive.
    Online,
    /// No session is currently established.
    Offline,
    /// A session is being established (auth handshake in flight).
    Connecting,
}

impl Server {
    /// Construct a fresh, never-connected server row.
    pub fn new(name: impl Into<String>, host: Option<String>, is_core: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            host,
            is_core,
            agent_status: AgentStatus::Offline,
            auth_token_hash: None,
            metrics: None,
            network_info: None,
            last_seen: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_server_starts_offline() {
        let s = Server::new("nodeA", Some("10.0.0.2".into()), false);
        assert_eq!(s.agent_status, AgentStatus::Offline);
        assert!(!s.is_core);
    }
}
