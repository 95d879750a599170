//! Seams the deployer depends on but doesn't implement itself: sending a
//! command to a live agent session, and looking up a manifest by name.
//!
//! The composition root (`hearth-orchestrator`) satisfies these narrow
//! traits over its own live state, so this crate never has to know about
//! sessions or an app store.

use async_trait::async_trait;
use hearth_proto::{AgentCommand, CommandResult, Manifest};
use uuid::Uuid;

/// Sends commands to a specific server's live agent session and awaits the
/// matching result, the way `service-registry::client`'s
/// `pending_requests` correlation table does for request/reply calls.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    /// Whether `server_id` currently has a live, authenticated session.
    fn is_connected(&self, server_id: Uuid) -> bool;

    /// Send `command` to `server_id` and wait for its `CommandResult`.
    /// Errors (not agent-reported failures — those are `Ok` with an error
    /// status) mean the session dropped before a result arrived.
    async fn send_command(&self, server_id: Uuid, command: AgentCommand) -> crate::error::Result<CommandResult>;
}

/// Looks up installable app manifests by name.
pub trait ManifestProvider: Send + Sync {
    /// The manifest named `name`, if registered.
    fn get(&self, name: &str) -> Option<Manifest>;

    /// Every registered manifest.
    fn all(&self) -> Vec<Manifest>;
}

/// A fixed, in-memory set of manifests — used by tests and by a minimal
/// deployment that doesn't yet have an app-store ingestion pipeline.
pub struct StaticManifestProvider {
    manifests: Vec<Manifest>,
}

impl StaticManifestProvider {
    /// Build a provider over a fixed manifest list.
    pub fn new(manifests: Vec<Manifest>) -> Self {
        Self { manifests }
    }
}

impl ManifestProvider for StaticManifestProvider {
    fn get(&self, name: &str) -> Option<Manifest> {
        self.manifests.iter().find(|m| m.name == name).cloned()
    }

    fn all(&self) -> Vec<Manifest> {
        self.manifests.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_proto::WebUi;

    fn manifest(name: &str) -> Manifest {
        Manifest {
            name: name.into(),
            display_name: name.into(),
            version: "1.0".into(),
            category: "utility".into(),
            config_schema: vec![],
            provides: vec![],
            requires: vec![],
            conflicts: vec![],
            webui: None::<WebUi>,
            service_user: None,
            service_group: None,
            data_directories: vec![],
            capabilities: vec![],
            logging: None,
            system: false,
            mandatory: false,
            singleton: false,
        }
    }

    #[test]
    fn static_provider_finds_by_name_and_lists_all() {
        let provider = StaticManifestProvider::new(vec![manifest("a"), manifest("b")]);
        assert!(provider.get("a").is_some());
        assert!(provider.get("missing").is_none());
        assert_eq!(provider.all().len(), 2);
    }
}
