//! System-apps bootstrap loop.
//!
//! Runs on an interval against the core server only: installs any manifest
//! flagged `mandatory` that has no deployment yet, using each of its
//! `configSchema` defaults as the install's `userConfig`. A long-lived
//! `smol::spawn` loop with a re-entrancy guard, not a cron.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hearth_proto::{ConfigFieldType, Manifest};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::{AgentDispatcher, ManifestProvider};
use crate::error::Result;
use crate::Deployer;

/// How often the loop wakes up to check for missing mandatory apps.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically installs every mandatory system app missing from the core
/// server. Mandatory apps install in name order, except that an app named
/// in `priority_first` (the proxy's own CA, so the reverse proxy it issues
/// certificates for can come up after it) always installs before the rest.
pub struct BootstrapLoop<D: AgentDispatcher> {
    deployer: Arc<Deployer<D>>,
    manifests: Arc<dyn ManifestProvider>,
    core_server_id: Uuid,
    interval: Duration,
    priority_first: Option<String>,
    running: Arc<AtomicBool>,
}

impl<D: AgentDispatcher + 'static> BootstrapLoop<D> {
    /// Build a loop targeting `core_server_id`, checking every `interval`.
    /// `priority_first`, if set, names the one mandatory app (typically the
    /// internal certificate authority) that must install before any other.
    pub fn new(
        deployer: Arc<Deployer<D>>,
        manifests: Arc<dyn ManifestProvider>,
        core_server_id: Uuid,
        interval: Duration,
        priority_first: Option<String>,
    ) -> Self {
        Self {
            deployer,
            manifests,
            core_server_id,
            interval,
            priority_first,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Missing mandatory apps in install order: `priority_first` (if
    /// mandatory and missing) first, then the rest sorted by name.
    pub fn missing_mandatory_apps(&self) -> Result<Vec<Manifest>> {
        let installed: std::collections::HashSet<String> = self
            .deployer
            .list_deployments(Some(self.core_server_id))?
            .into_iter()
            .map(|d| d.app_name)
            .collect();

        let mut missing: Vec<Manifest> = self
            .manifests
            .all()
            .into_iter()
            .filter(|m| m.mandatory && !installed.contains(&m.name))
            .collect();

        missing.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(first) = &self.priority_first {
            if let Some(pos) = missing.iter().position(|m| &m.name == first) {
                let app = missing.remove(pos);
                missing.insert(0, app);
            }
        }
        Ok(missing)
    }

    /// Run one pass: install every currently-missing mandatory app, in
    /// order, stopping at the first failure (later apps may depend on it).
    /// Re-entrant calls while a pass is already running are no-ops.
    pub async fn tick(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let result = self.run_pass().await;
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = result {
            warn!(error = %e, "bootstrap pass failed; will retry next tick");
        }
    }

    async fn run_pass(&self) -> Result<()> {
        let missing = self.missing_mandatory_apps()?;
        if missing.is_empty() {
            return Ok(());
        }
        for manifest in missing {
            info!(app = %manifest.name, "bootstrap: installing missing mandatory system app");
            let user_config = default_user_config(&manifest);
            self.deployer.install(self.core_server_id, &manifest.name, user_config).await?;
        }
        Ok(())
    }

    /// Spawn the loop as a detached background task, ticking every
    /// `self.interval` until the returned handle is dropped or stopped.
    pub fn spawn(self: Arc<Self>) -> smol::Task<()> {
        let interval = self.interval;
        smol::spawn(async move {
            loop {
                self.tick().await;
                smol::Timer::after(interval).await;
            }
        })
    }
}

fn default_user_config(manifest: &Manifest) -> hearth_proto::UserConfig {
    let mut config = hearth_proto::UserConfig::new();
    for field in &manifest.config_schema {
        if field.generated {
            continue;
        }
        if matches!(field.field_type, ConfigFieldType::Password) {
            continue;
        }
        if let Some(default) = &field.default {
            config.insert(field.name.clone(), default.clone());
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hearth_proto::{AgentCommand, CommandResult, ConfigField, Server, ServiceDef};
    use hearth_proxy::{Fallback, Listener, ProxyManager, ProxyManagerConfig, TlsPolicy};
    use hearth_registry::Registry;
    use hearth_store::Store;

    use crate::audit::AuditLog;
    use crate::deployer::{DeployerConfig, NoopHaManager};
    use crate::dispatch::StaticManifestProvider;
    use crate::mutex::MutexManager;
    use crate::secrets::SecretStore;
    use crate::template::FsTemplateSource;

    struct AlwaysOkDispatcher;

    #[async_trait]
    impl AgentDispatcher for AlwaysOkDispatcher {
        fn is_connected(&self, _server_id: Uuid) -> bool {
            true
        }

        async fn send_command(&self, _server_id: Uuid, command: AgentCommand) -> Result<CommandResult> {
            Ok(CommandResult::success(command.id))
        }
    }

    fn proxy_config() -> ProxyManagerConfig {
        ProxyManagerConfig {
            admin_load_url: "http://127.0.0.1:1/load".into(),
            debounce_window: Duration::from_millis(20),
            retry_attempts: 1,
            retry_base_delay: Duration::from_millis(1),
            retry_cap_delay: Duration::from_millis(2),
            circuit_threshold: 100,
            circuit_recovery: Duration::from_secs(60),
            tls_policy: TlsPolicy::SelfSigned,
            fallback: Fallback::StaticUi { root: "/opt/ui".into() },
            listener: Listener { host: "0.0.0.0".into(), port: 443 },
        }
    }

    fn mandatory_manifest(name: &str) -> Manifest {
        Manifest {
            name: name.into(),
            display_name: name.into(),
            version: "1.0".into(),
            category: "system".into(),
            config_schema: vec![ConfigField {
                name: "network".into(),
                label: "Network".into(),
                field_type: ConfigFieldType::String,
                required: false,
                default: Some(serde_json::json!("mainnet")),
                options: vec![],
                generated: false,
                secret: false,
                inherit_from: None,
            }],
            provides: vec![ServiceDef { name: format!("{name}-svc"), port: 8080, protocol: hearth_proto::Protocol::Http }],
            requires: vec![],
            conflicts: vec![],
            webui: None,
            service_user: None,
            service_group: None,
            data_directories: vec![],
            capabilities: vec![],
            logging: None,
            system: true,
            mandatory: true,
            singleton: true,
        }
    }

    fn harness(manifests: Vec<Manifest>, priority_first: Option<String>) -> (BootstrapLoop<AlwaysOkDispatcher>, Uuid) {
        let store = Store::temporary(&[crate::audit::migration()]).unwrap();
        let registry = Arc::new(Registry::open(&store, 9000, 9010).unwrap());
        let server = Server::new("core", None, true);
        registry.put_server(&server).unwrap();

        let secrets = Arc::new(SecretStore::new(store.tree("secrets").unwrap(), &secrecy::Secret::new([9u8; 32])));
        let proxy = Arc::new(ProxyManager::new(Arc::clone(&registry), proxy_config()));
        let templates = Arc::new(FsTemplateSource::new(std::env::temp_dir().join("hearth-bootstrap-test-unused")));
        let manifest_provider = Arc::new(StaticManifestProvider::new(manifests));
        let dispatcher = Arc::new(AlwaysOkDispatcher);

        let deployer = Arc::new(Deployer::new(
            store.tree("deployments").unwrap(),
            store.tree("servers").unwrap(),
            registry,
            proxy,
            secrets,
            templates,
            Arc::clone(&manifest_provider) as Arc<dyn ManifestProvider>,
            dispatcher,
            Arc::new(MutexManager::new()),
            Arc::new(AuditLog::new(store.tree("audit").unwrap())),
            Arc::new(NoopHaManager),
            DeployerConfig { product: "hearth".into(), proxy_app_name: "caddy".into(), ca_root_cert_pem: None },
        ));

        let loop_ = BootstrapLoop::new(
            Arc::clone(&deployer),
            manifest_provider as Arc<dyn ManifestProvider>,
            server.id,
            DEFAULT_INTERVAL,
            priority_first,
        );
        (loop_, server.id)
    }

    #[test]
    fn missing_mandatory_apps_are_sorted_with_priority_first_leading() {
        let (loop_, _) = harness(
            vec![mandatory_manifest("zeta-ca"), mandatory_manifest("alpha-proxy"), mandatory_manifest("beta-ca")],
            Some("beta-ca".to_string()),
        );
        let missing = loop_.missing_mandatory_apps().unwrap();
        let names: Vec<_> = missing.iter().map(|m| m.name.clone()).collect();
        assert_eq!(names, vec!["beta-ca", "alpha-proxy", "zeta-ca"]);
    }

    #[smol_potat::test]
    async fn tick_installs_every_missing_mandatory_app_and_then_stops() {
        let (loop_, core) = harness(vec![mandatory_manifest("ca"), mandatory_manifest("proxy")], Some("ca".to_string()));
        loop_.tick().await;
        let deployed = loop_.deployer.list_deployments(Some(core)).unwrap();
        assert_eq!(deployed.len(), 2);
        assert!(loop_.missing_mandatory_apps().unwrap().is_empty());
    }

    #[smol_potat::test]
    async fn non_mandatory_manifests_are_never_installed() {
        let mut optional = mandatory_manifest("analytics-dashboard");
        optional.mandatory = false;
        let (loop_, core) = harness(vec![optional], None);
        loop_.tick().await;
        assert!(loop_.deployer.list_deployments(Some(core)).unwrap().is_empty());
    }

    #[smol_potat::test]
    async fn default_user_config_skips_generated_and_password_fields() {
        let mut manifest = mandatory_manifest("wallet");
        manifest.config_schema.push(ConfigField {
            name: "rpc_password".into(),
            label: "RPC password".into(),
            field_type: ConfigFieldType::Password,
            required: false,
            default: Some(serde_json::json!("should-not-appear")),
            options: vec![],
            generated: true,
            secret: true,
            inherit_from: None,
        });
        let config = default_user_config(&manifest);
        assert_eq!(config.get("network"), Some(&serde_json::json!("mainnet")));
        assert!(!config.contains_key("rpc_password"));
    }
}
