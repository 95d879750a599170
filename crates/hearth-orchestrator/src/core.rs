//! Composition root: wires the store, registry, proxy manager, deployer,
//! session registry, and operator-facing stores into one handle the
//! session-accept server and CLI both drive.

use std::sync::Arc;

use hearth_deployer::{AuditLog, BootstrapLoop, Deployer, DeployerConfig, ManifestProvider, MutexManager, NoopHaManager, SecretStore};
use hearth_proto::session::{AgentEvent, SessionAuth};
use hearth_proto::{AgentStatus, Server};
use hearth_proxy::{Fallback, Listener, ProxyManager, ProxyManagerConfig, TlsPolicy};
use hearth_registry::Registry;
use hearth_store::Store;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::manifests::FsManifestProvider;
use crate::server::AuthDecision;
use crate::sessions::SessionRegistry;
use crate::tokens::TokenStore;
use crate::users::UserStore;

/// Default interval between the bootstrap loop's reconciliation passes.
const BOOTSTRAP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

/// Every collaborator the daemon binary and the CLI need a handle to.
pub struct Core {
    pub registry: Arc<Registry>,
    pub proxy: Arc<ProxyManager>,
    pub deployer: Arc<Deployer<SessionRegistry>>,
    pub bootstrap: Arc<BootstrapLoop<SessionRegistry>>,
    pub sessions: Arc<SessionRegistry>,
    pub users: Arc<UserStore>,
    pub tokens: Arc<TokenStore>,
    pub config: OrchestratorConfig,
}

impl Core {
    /// Open the store at `config.db_path`, run migrations, and assemble
    /// every collaborator. Ensures exactly one core server row exists.
    pub fn bootstrap(config: OrchestratorConfig) -> anyhow::Result<Self> {
        let store = Store::open(&config.db_path, &[hearth_deployer::audit::migration()])?;

        let registry = Arc::new(Registry::open(&store, config.tcp_port_min, config.tcp_port_max)?);
        ensure_core_server(&registry, config.server_id)?;

        let proxy = Arc::new(ProxyManager::new(Arc::clone(&registry), proxy_manager_config(&config)));

        let secrets = Arc::new(SecretStore::new(store.tree("secrets")?, &secrecy::Secret::new(config.secret_encryption_key)));
        let templates = Arc::new(hearth_deployer::FsTemplateSource::new(config.manifest_dir.join("templates")));
        let manifests: Arc<dyn ManifestProvider> = Arc::new(FsManifestProvider::load(&config.manifest_dir)?);

        let sessions = Arc::new(SessionRegistry::new());
        let mutexes = Arc::new(MutexManager::new());
        let audit = Arc::new(AuditLog::new(store.tree("audit")?));

        let deployer_config = DeployerConfig {
            product: config.product.clone(),
            proxy_app_name: config.proxy_app_name.clone(),
            ca_root_cert_pem: config.ca_root_cert_path.as_ref().and_then(|p| std::fs::read_to_string(p).ok()),
        };

        let deployer = Arc::new(Deployer::new(
            store.tree("deployments")?,
            store.tree("servers")?,
            Arc::clone(&registry),
            Arc::clone(&proxy),
            secrets,
            templates,
            Arc::clone(&manifests),
            Arc::clone(&sessions),
            mutexes,
            audit,
            Arc::new(NoopHaManager),
            deployer_config,
        ));

        let bootstrap = Arc::new(BootstrapLoop::new(
            Arc::clone(&deployer),
            manifests,
            config.server_id,
            BOOTSTRAP_INTERVAL,
            config.bootstrap_priority_first.clone(),
        ));

        let users = Arc::new(UserStore::new(store.tree("users")?, config.bcrypt_cost));
        let tokens = Arc::new(TokenStore::new(store.tree("agent_tokens")?));

        Ok(Self { registry, proxy, deployer, bootstrap, sessions, users, tokens, config })
    }

    /// Spawn the bootstrap loop as a background task.
    pub fn spawn_bootstrap(&self) -> smol::Task<()> {
        Arc::clone(&self.bootstrap).spawn()
    }
}

fn proxy_manager_config(config: &OrchestratorConfig) -> ProxyManagerConfig {
    let tls_policy = match (&config.domain, &config.ca_root_cert_path) {
        (Some(domain), Some(ca_root)) => TlsPolicy::InternalAcme {
            directory_url: format!("https://{domain}/acme/directory"),
            ca_root_path: ca_root.display().to_string(),
        },
        _ => TlsPolicy::SelfSigned,
    };

    let fallback = match config.node_env {
        crate::config::NodeEnv::Production => Fallback::StaticUi { root: "/opt/hearth-ui/dist".into() },
        crate::config::NodeEnv::Development => Fallback::DevServer { upstream: "http://127.0.0.1:5173".into() },
    };

    ProxyManagerConfig {
        admin_load_url: config.proxy_admin_url.clone(),
        debounce_window: std::time::Duration::from_millis(500),
        retry_attempts: 5,
        retry_base_delay: std::time::Duration::from_millis(200),
        retry_cap_delay: std::time::Duration::from_secs(5),
        circuit_threshold: 5,
        circuit_recovery: std::time::Duration::from_secs(30),
        tls_policy,
        fallback,
        listener: Listener { host: "0.0.0.0".into(), port: 443 },
    }
}

fn ensure_core_server(registry: &Registry, server_id: Uuid) -> anyhow::Result<()> {
    if registry.get_server(server_id)?.is_some() {
        return Ok(());
    }
    let existing_core = registry.list_servers()?.into_iter().find(|s| s.is_core);
    if let Some(core) = existing_core {
        warn!(configured = %server_id, existing = %core.id, "SERVER_ID does not match the stored core server row");
        return Ok(());
    }
    let mut server = Server::new("core", None, true);
    server.id = server_id;
    registry.put_server(&server)?;
    info!(%server_id, "provisioned core server row");
    Ok(())
}

/// Satisfies [`crate::server::SessionHandler`] over the composition root's
/// own registry, token store, and session table.
#[async_trait::async_trait]
impl crate::server::SessionHandler for Core {
    async fn authenticate(&self, auth: &SessionAuth) -> AuthDecision {
        let Ok(Some(server)) = self.registry.get_server(auth.server_id) else {
            return AuthDecision::Rejected;
        };
        // The core server authenticates over loopback without a minted
        // token in development; every other session needs one verified
        // against the `agent_tokens` tree.
        if server.is_core && self.config.auth_token.is_none() {
            return AuthDecision::Accepted(server.id);
        }
        match self.tokens.verify(auth.server_id, &auth.token) {
            Ok(true) => AuthDecision::Accepted(server.id),
            _ => AuthDecision::Rejected,
        }
    }

    async fn on_connect(&self, server_id: Uuid) -> async_channel::Receiver<hearth_proto::session::ServerEvent> {
        let (_tx, rx) = self.sessions.register(server_id);
        if let Err(e) = self.registry.set_agent_status(server_id, AgentStatus::Online) {
            warn!(%server_id, error = %e, "failed to mark server online");
        }
        rx
    }

    async fn on_disconnect(&self, server_id: Uuid) {
        self.sessions.unregister(server_id);
        if let Err(e) = self.registry.set_agent_status(server_id, AgentStatus::Offline) {
            warn!(%server_id, error = %e, "failed to mark server offline");
        }
    }

    async fn on_event(&self, server_id: Uuid, event: AgentEvent) {
        match event {
            AgentEvent::Status { report } => {
                if let Err(e) = self.registry.record_status(server_id, &report) {
                    warn!(%server_id, error = %e, "failed to record status report");
                }
            }
            AgentEvent::CommandAck { .. } => {
                // Acks precede results and carry no state the orchestrator
                // persists; logged
                // only for operators tailing session traffic.
            }
            AgentEvent::CommandResult { result } => {
                self.sessions.complete_command(server_id, result);
            }
            AgentEvent::LogsResult { .. } | AgentEvent::LogsStreamLine { .. } | AgentEvent::LogsStreamStatus { .. } => {
                // Log streaming is relayed straight to whichever caller
                // opened it; the REST/WS fan-out layer that owns that
                // subscription table is out of this crate's scope.
            }
            AgentEvent::Pong => {}
        }
    }
}
