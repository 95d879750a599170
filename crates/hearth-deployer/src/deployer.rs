//! The transactional install/configure/start/stop/uninstall pipeline.
//! All five state-changing operations run under the per-server mutex
//! serializing work against the target host; `start` and `stop`
//! additionally hold the per-deployment mutex to serialize debounced
//! reconfiguration against the same row. Every step of `install` pushes a
//! compensating action onto a stack that unwinds in reverse order on any
//! later failure, since the pipeline spans a remote agent round-trip that
//! a simple `Drop`/`?` ladder can't unwind on its own.

use std::collections::HashMap;
use std::sync::Arc;

use hearth_proto::{Action, AgentCommand, Deployment, DeploymentStatus, Manifest, Server, UserConfig};
use hearth_registry::Registry;
use hearth_proxy::ProxyManager;
use hearth_store::Tree;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::compensation::CompensationStack;
use crate::dispatch::{AgentDispatcher, ManifestProvider};
use crate::error::{Error, Result};
use crate::mutex::MutexManager;
use crate::secrets::{self, SecretStore};
use crate::template::{ScriptKind, TemplateSource};

/// Best-effort hook for registering the proxy app with the HA manager once
/// its install pipeline completes. The HA manager itself (keepalived
/// coordination) is an external collaborator; this seam exists so a
/// composition root can wire one in without the deployer depending on it
/// directly.
pub trait HaManager: Send + Sync {
    /// Register `deployment` (the proxy app's own deployment) with HA.
    /// Errors are logged by the caller and never fail the install.
    fn register_proxy(&self, deployment: &Deployment) -> Result<()>;
}

/// Does nothing; the default when no HA manager is configured.
#[derive(Default)]
pub struct NoopHaManager;

impl HaManager for NoopHaManager {
    fn register_proxy(&self, _deployment: &Deployment) -> Result<()> {
        Ok(())
    }
}

/// Fixed knobs the deployer needs beyond its collaborators.
#[derive(Clone)]
pub struct DeployerConfig {
    /// Product prefix used to derive the capability target binary path,
    /// matching `hearth_executor::Executor`'s own `/opt/<product>/...` layout.
    pub product: String,
    /// Manifest name of the reverse-proxy system app.
    pub proxy_app_name: String,
    /// PEM contents of the fleet's CA root certificate, written to the proxy
    /// app's install tree as `/etc/caddy/ca-root.crt` (step 4). `None` skips
    /// the extra file — used in tests and before the CA system app exists.
    pub ca_root_cert_pem: Option<String>,
}

/// The transactional deployer.
pub struct Deployer<D: AgentDispatcher> {
    deployments: Tree<Deployment>,
    servers: Tree<Server>,
    registry: Arc<Registry>,
    proxy: Arc<ProxyManager>,
    secrets: Arc<SecretStore>,
    templates: Arc<dyn TemplateSource>,
    manifests: Arc<dyn ManifestProvider>,
    dispatcher: Arc<D>,
    mutexes: Arc<MutexManager>,
    audit: Arc<AuditLog>,
    ha: Arc<dyn HaManager>,
    config: DeployerConfig,
}

impl<D: AgentDispatcher> Deployer<D> {
    /// Assemble a deployer over its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deployments: Tree<Deployment>,
        servers: Tree<Server>,
        registry: Arc<Registry>,
        proxy: Arc<ProxyManager>,
        secrets: Arc<SecretStore>,
        templates: Arc<dyn TemplateSource>,
        manifests: Arc<dyn ManifestProvider>,
        dispatcher: Arc<D>,
        mutexes: Arc<MutexManager>,
        audit: Arc<AuditLog>,
        ha: Arc<dyn HaManager>,
        config: DeployerConfig,
    ) -> Self {
        Self {
            deployments,
            servers,
            registry,
            proxy,
            secrets,
            templates,
            manifests,
            dispatcher,
            mutexes,
            audit,
            ha,
            config,
        }
    }

    /// Fetch a deployment row by id.
    pub fn get_deployment(&self, id: Uuid) -> Result<Option<Deployment>> {
        Ok(self.deployments.get(id.as_bytes())?)
    }

    /// List deployments, optionally restricted to one server.
    pub fn list_deployments(&self, server_id: Option<Uuid>) -> Result<Vec<Deployment>> {
        let all = self.deployments.scan()?;
        Ok(match server_id {
            Some(sid) => all.into_iter().filter(|d| d.server_id == sid).collect(),
            None => all,
        })
    }

    /// Force a deployment's status, for orchestrator-side deadline handling
    /// when no command result arrives in time.
    pub fn update_status(&self, id: Uuid, status: DeploymentStatus, message: Option<String>) -> Result<()> {
        let mut deployment = self
            .deployments
            .get(id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("deployment {id}")))?;
        deployment.status = status;
        deployment.status_message = message;
        deployment.updated_at = chrono::Utc::now();
        self.deployments.put(deployment.id.as_bytes(), &deployment)?;
        Ok(())
    }

    // ---- install ----------------------------------------------------

    /// Install `app_name` on `server_id` with `user_config`.
    ///
    /// Ends with the deployment in `running` status — `DeploymentStatus`
    /// has no "installed but not started" variant, so a completed install
    /// always implies the internal start sub-step succeeded, matching the
    /// state diagram's `installing --ok--> running` edge.
    pub async fn install(&self, server_id: Uuid, app_name: &str, user_config: UserConfig) -> Result<Deployment> {
        let _server_lock = self.mutexes.lock_server_owned(server_id).await;

        if !self.dispatcher.is_connected(server_id) {
            return Err(Error::AgentDisconnected(server_id));
        }
        let manifest = self
            .manifests
            .get(app_name)
            .ok_or_else(|| Error::NotFound(format!("manifest '{app_name}'")))?;

        self.check_no_duplicate(server_id, app_name)?;
        self.check_singleton(&manifest, app_name)?;
        self.check_conflicts(&manifest, server_id, app_name)?;

        let validation = hearth_resolver::validate(&manifest, server_id, &self.registry)?;
        if !validation.valid {
            return Err(Error::Validation(validation.errors.join("; ")));
        }
        for warning in &validation.warnings {
            tracing::warn!(app = app_name, %warning, "optional dependency unmet at install time");
        }

        let public_config = hearth_resolver::resolve(&manifest, server_id, &user_config, &self.registry)?;
        let mut full_config = public_config.clone();
        secrets::generate_secret_values(&manifest, app_name, &mut full_config);

        let deployment = Deployment::new(server_id, app_name, &manifest.version, public_config);
        let deployment_id = deployment.id;

        let mut stack = CompensationStack::new();
        let outcome = self
            .run_install_pipeline(&manifest, server_id, deployment, full_config, &mut stack)
            .await;

        match outcome {
            Ok(installed) => {
                stack.forget();
                self.audit.record(
                    "deployment_installed",
                    Some(deployment_id),
                    Some(server_id),
                    Some(app_name),
                    "install pipeline completed",
                );
                if manifest.name == self.config.proxy_app_name {
                    if let Err(e) = self.ha.register_proxy(&installed) {
                        tracing::warn!(error = %e, "best-effort HA registration of proxy app failed");
                    }
                }
                Ok(installed)
            }
            Err(e) => {
                stack.unwind();
                self.audit.record(
                    "deployment_install_failed",
                    Some(deployment_id),
                    Some(server_id),
                    Some(app_name),
                    e.to_string(),
                );
                Err(e)
            }
        }
    }

    fn check_no_duplicate(&self, server_id: Uuid, app_name: &str) -> Result<()> {
        let exists = self
            .deployments
            .scan()?
            .into_iter()
            .any(|d| d.server_id == server_id && d.app_name == app_name);
        if exists {
            return Err(Error::Conflict(format!(
                "deployment for '{app_name}' already exists on server {server_id}"
            )));
        }
        Ok(())
    }

    fn check_singleton(&self, manifest: &Manifest, app_name: &str) -> Result<()> {
        if !manifest.singleton {
            return Ok(());
        }
        if let Some(prior) = self.deployments.scan()?.into_iter().find(|d| d.app_name == app_name) {
            return Err(Error::Conflict(format!(
                "'{app_name}' is singleton; already deployed on server {}",
                prior.server_id
            )));
        }
        Ok(())
    }

    /// A conflict blocks install when either manifest names the other
    /// (rather than requiring both to reciprocate) — a unilateral
    /// `conflicts` entry would otherwise be silently unenforceable
    /// whenever the other app's author didn't also list it back.
    fn check_conflicts(&self, manifest: &Manifest, server_id: Uuid, app_name: &str) -> Result<()> {
        for other in self.deployments.scan()?.into_iter().filter(|d| d.server_id == server_id) {
            let Some(other_manifest) = self.manifests.get(&other.app_name) else {
                continue;
            };
            let conflicting = manifest.conflicts.iter().any(|c| c == &other.app_name)
                || other_manifest.conflicts.iter().any(|c| c == app_name);
            if conflicting {
                return Err(Error::Conflict(format!(
                    "'{app_name}' conflicts with installed app '{}'",
                    other.app_name
                )));
            }
        }
        Ok(())
    }

    async fn run_install_pipeline(
        &self,
        manifest: &Manifest,
        server_id: Uuid,
        mut deployment: Deployment,
        full_config: UserConfig,
        stack: &mut CompensationStack,
    ) -> Result<Deployment> {
        // Step 3: deployment row + secrets, both "in one transaction".
        deployment.status = DeploymentStatus::Installing;
        self.deployments.put(deployment.id.as_bytes(), &deployment)?;
        self.secrets.put(deployment.id, &full_config, false)?;
        {
            let deployments = self.deployments.clone();
            let secrets = self.secrets.clone();
            let id = deployment.id;
            stack.push("create_deployment_row", move || {
                if let Err(e) = secrets.remove(id) {
                    tracing::warn!(error = %e, "compensation: failed to remove secrets");
                }
                if let Err(e) = deployments.remove(id.as_bytes()) {
                    tracing::warn!(error = %e, "compensation: failed to remove deployment row");
                }
            });
        }

        // Step 4: render config files + lifecycle scripts + unit.
        let mut config_files = self.templates.render_config_files(manifest, &full_config)?;
        if manifest.name == self.config.proxy_app_name {
            if let Some(ca_pem) = &self.config.ca_root_cert_pem {
                config_files.push(hearth_executor::ConfigFile {
                    path: "/etc/caddy/ca-root.crt".to_string(),
                    contents: ca_pem.clone(),
                });
            }
        }
        let install_script = self.templates.render_script(manifest, ScriptKind::Install, &full_config)?;
        let unit_file = self.templates.render_unit_file(manifest, &full_config)?;

        let capability_target = (!manifest.capabilities.is_empty()).then(|| {
            format!("/opt/{}/{}/bin/{}", self.config.product, manifest.name, manifest.name)
        });

        let install_payload = hearth_executor::InstallPayload {
            config_files,
            install_script,
            env: config_to_env(&full_config),
            service_user: manifest.service_user.clone(),
            service_group: manifest.service_group.clone(),
            data_directories: manifest.data_directories.clone(),
            capabilities: manifest.capabilities.clone(),
            capability_target,
            unit_file,
        };

        // Step 5: send `install`, await result.
        self.dispatch_and_require_success(
            server_id,
            Action::Install,
            &deployment.app_name,
            serde_json::to_value(&install_payload).map_err(|e| Error::Internal(e.to_string()))?,
        )
        .await?;

        // Bring the service up so the state machine can land on `running`
        // in one pipeline; `DeploymentStatus` has no intermediate
        // "installed but not started" variant.
        self.dispatch_and_require_success(server_id, Action::Start, &deployment.app_name, serde_json::Value::Null)
            .await?;

        // Step 6: register services + their proxy routes.
        let mut registered_services = Vec::new();
        for def in &manifest.provides {
            let record = self.registry.register_service(deployment.id, &def.name, server_id, def.port)?;
            let route = self.registry.register_service_route(&record, def.protocol)?;
            registered_services.push((record.deployment_id, record.service_name.clone(), route.service_id));
        }
        {
            let registry = Arc::clone(&self.registry);
            let services = registered_services.clone();
            stack.push("register_services", move || {
                for (deployment_id, name, service_id) in services {
                    if let Err(e) = registry.unregister_service_route(service_id) {
                        tracing::warn!(error = %e, "compensation: failed to unregister service route");
                    }
                    if let Err(e) = registry.unregister_service(deployment_id, &name) {
                        tracing::warn!(error = %e, "compensation: failed to unregister service");
                    }
                }
            });
        }

        // Step 7: register the web UI route, if any.
        if let Some(webui) = &manifest.webui {
            if webui.enabled {
                let host = self.registry.server_host(server_id)?;
                let upstream = format!("http://{host}:{}", webui.port);
                self.registry.register_proxy_route(deployment.id, &webui.base_path, &upstream)?;
                let registry = Arc::clone(&self.registry);
                let id = deployment.id;
                stack.push("register_webui_route", move || {
                    if let Err(e) = registry.unregister_proxy_route(id) {
                        tracing::warn!(error = %e, "compensation: failed to unregister web UI route");
                    }
                });
            }
        }

        // Step 8: push the new route table. Failure here is fatal.
        self.proxy.update_and_reload().await?;

        // Step 9: land in `running`.
        deployment.status = DeploymentStatus::Running;
        deployment.updated_at = chrono::Utc::now();
        self.deployments.put(deployment.id.as_bytes(), &deployment)?;

        Ok(deployment)
    }

    async fn dispatch_and_require_success(
        &self,
        server_id: Uuid,
        action: Action,
        app_name: &str,
        payload: serde_json::Value,
    ) -> Result<hearth_proto::CommandResult> {
        let command = AgentCommand {
            id: Uuid::new_v4(),
            action,
            app_name: Some(app_name.to_string()),
            payload: if payload.is_null() { None } else { Some(payload) },
        };
        let result = self.dispatcher.send_command(server_id, command).await?;
        if !result.is_success() {
            return Err(Error::CommandFailed(
                result.message.unwrap_or_else(|| format!("{action:?} failed with no message")),
            ));
        }
        Ok(result)
    }

    // ---- configure ----------------------------------------------------

    /// Merge `new_config` over the deployment's existing config, re-render
    /// its files, and send the agent a `configure` command — synchronously
    /// awaiting the result.
    pub async fn configure(&self, deployment_id: Uuid, new_config: UserConfig) -> Result<Deployment> {
        let mut deployment = self.require_deployment(deployment_id)?;
        let _lock = self.mutexes.lock_deployment_owned(deployment_id).await;

        if !self.dispatcher.is_connected(deployment.server_id) {
            return Err(Error::AgentDisconnected(deployment.server_id));
        }
        let manifest = self
            .manifests
            .get(&deployment.app_name)
            .ok_or_else(|| Error::NotFound(format!("manifest '{}'", deployment.app_name)))?;

        for (k, v) in new_config {
            deployment.config.insert(k, v);
        }

        let mut full_config = deployment.config.clone();
        let existing_secrets = self.secrets.get(deployment_id)?.unwrap_or_default();
        for (k, v) in existing_secrets {
            full_config.entry(k).or_insert(v);
        }
        secrets::generate_secret_values(&manifest, &deployment.app_name, &mut full_config);
        self.secrets.put(deployment_id, &full_config, false)?;

        let config_files = self.templates.render_config_files(&manifest, &full_config)?;
        let configure_script = self.templates.render_script(&manifest, ScriptKind::Configure, &full_config)?;

        deployment.status = DeploymentStatus::Configuring;
        deployment.updated_at = chrono::Utc::now();
        self.deployments.put(deployment.id.as_bytes(), &deployment)?;

        let payload = hearth_executor::ConfigurePayload {
            config_files,
            configure_script,
            env: config_to_env(&full_config),
        };

        let dispatch_result = self
            .dispatch_and_require_success(
                deployment.server_id,
                Action::Configure,
                &deployment.app_name,
                serde_json::to_value(&payload).map_err(|e| Error::Internal(e.to_string()))?,
            )
            .await;

        match dispatch_result {
            Ok(_) => {
                deployment.status = DeploymentStatus::Running;
                deployment.status_message = None;
            }
            Err(e) => {
                deployment.status = DeploymentStatus::Error;
                deployment.status_message = Some(e.to_string());
                deployment.updated_at = chrono::Utc::now();
                self.deployments.put(deployment.id.as_bytes(), &deployment)?;
                return Err(e);
            }
        }
        deployment.updated_at = chrono::Utc::now();
        self.deployments.put(deployment.id.as_bytes(), &deployment)?;
        Ok(deployment)
    }

    // ---- start / stop / restart ---------------------------------------

    /// Start a stopped deployment: reactivates its web UI route and issues
    /// a debounced proxy reload alongside the agent's `start` command.
    pub async fn start(&self, deployment_id: Uuid) -> Result<Deployment> {
        self.toggle(deployment_id, true, Action::Start).await
    }

    /// Stop a running deployment: deactivates its web UI route.
    pub async fn stop(&self, deployment_id: Uuid) -> Result<Deployment> {
        self.toggle(deployment_id, false, Action::Stop).await
    }

    async fn toggle(&self, deployment_id: Uuid, activate: bool, action: Action) -> Result<Deployment> {
        let mut deployment = self.require_deployment(deployment_id)?;
        let _lock = self.mutexes.lock_deployment_owned(deployment_id).await;

        if !self.dispatcher.is_connected(deployment.server_id) {
            return Err(Error::AgentDisconnected(deployment.server_id));
        }

        deployment.status = if activate { DeploymentStatus::Running } else { DeploymentStatus::Stopped };
        deployment.updated_at = chrono::Utc::now();
        self.deployments.put(deployment.id.as_bytes(), &deployment)?;
        self.registry.set_proxy_route_active(deployment.id, activate)?;
        self.proxy.schedule_reload();

        if let Err(e) = self
            .dispatch_and_require_success(deployment.server_id, action, &deployment.app_name, serde_json::Value::Null)
            .await
        {
            deployment.status = DeploymentStatus::Error;
            deployment.status_message = Some(e.to_string());
            deployment.updated_at = chrono::Utc::now();
            self.deployments.put(deployment.id.as_bytes(), &deployment)?;
            return Err(e);
        }
        Ok(deployment)
    }

    /// Restart a running deployment: no route change, just re-issues the
    /// agent's `restart` command.
    pub async fn restart(&self, deployment_id: Uuid) -> Result<Deployment> {
        let mut deployment = self.require_deployment(deployment_id)?;
        let _lock = self.mutexes.lock_deployment_owned(deployment_id).await;

        if !self.dispatcher.is_connected(deployment.server_id) {
            return Err(Error::AgentDisconnected(deployment.server_id));
        }
        self.dispatch_and_require_success(deployment.server_id, Action::Restart, &deployment.app_name, serde_json::Value::Null)
            .await?;
        deployment.status = DeploymentStatus::Running;
        deployment.updated_at = chrono::Utc::now();
        self.deployments.put(deployment.id.as_bytes(), &deployment)?;
        Ok(deployment)
    }

    // ---- uninstall ------------------------------------------------------

    /// Remove a deployment: blocked for mandatory system apps on the core
    /// server. Cleanup continues even if the agent's own `uninstall`
    /// command fails, since its host files may already be partially gone.
    pub async fn uninstall(&self, deployment_id: Uuid) -> Result<()> {
        let deployment = self.require_deployment(deployment_id)?;
        let _server_lock = self.mutexes.lock_server_owned(deployment.server_id).await;
        let guard = self.mutexes.lock_deployment_owned(deployment_id).await;

        let manifest = self.manifests.get(&deployment.app_name);
        let server = self.servers.get(deployment.server_id.as_bytes())?;
        let is_mandatory_on_core = manifest.as_ref().is_some_and(|m| m.mandatory)
            && server.as_ref().is_some_and(|s| s.is_core);
        if is_mandatory_on_core {
            return Err(Error::Conflict(format!(
                "'{}' is a mandatory system app on the core server and cannot be uninstalled",
                deployment.app_name
            )));
        }

        if let Err(e) = self.run_uninstall(&deployment, manifest.as_ref()).await {
            self.update_status(deployment_id, DeploymentStatus::Error, Some(e.to_string())).ok();
            self.audit.record(
                "deployment_uninstall_failed",
                Some(deployment_id),
                Some(deployment.server_id),
                Some(&deployment.app_name),
                e.to_string(),
            );
            return Err(e);
        }

        drop(guard);
        self.mutexes.release_deployment(deployment_id);

        if let Err(e) = self.proxy.update_and_reload().await {
            tracing::warn!(error = %e, "post-uninstall proxy reload failed; circuit breaker governs recovery");
        }

        self.audit.record(
            "deployment_uninstalled",
            Some(deployment_id),
            Some(deployment.server_id),
            Some(&deployment.app_name),
            "uninstall pipeline completed",
        );
        Ok(())
    }

    async fn run_uninstall(&self, deployment: &Deployment, manifest: Option<&Manifest>) -> Result<()> {
        self.update_status(deployment.id, DeploymentStatus::Uninstalling, None)?;

        let uninstall_script_payload = serde_json::json!({});
        if let Err(e) = self
            .dispatch_and_require_success(
                deployment.server_id,
                Action::Uninstall,
                &deployment.app_name,
                uninstall_script_payload,
            )
            .await
        {
            tracing::warn!(error = %e, deployment = %deployment.id, "agent uninstall command failed; continuing cleanup");
        }

        self.registry.unregister_proxy_route(deployment.id)?;
        if let Some(manifest) = manifest {
            for def in &manifest.provides {
                if let Some(record) = self.registry.find_service_on_server(&def.name, deployment.server_id)? {
                    if record.deployment_id == deployment.id {
                        self.registry.unregister_service_route(record.id)?;
                    }
                }
            }
        }
        self.registry.unregister_services_for_deployment(deployment.id)?;

        self.secrets.remove(deployment.id)?;
        self.deployments.remove(deployment.id.as_bytes())?;

        Ok(())
    }

    fn require_deployment(&self, id: Uuid) -> Result<Deployment> {
        self.deployments
            .get(id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("deployment {id}")))
    }
}

fn config_to_env(config: &UserConfig) -> std::collections::BTreeMap<String, String> {
    let mut env = std::collections::BTreeMap::new();
    for (key, value) in config {
        env.insert(key.to_uppercase(), value_to_env_string(value));
    }
    env
}

fn value_to_env_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hearth_proto::{CommandResult, ConfigField, ConfigFieldType, Protocol as Proto, ServiceDef, WebUi};
    use hearth_proxy::{Fallback, Listener, ProxyManagerConfig, TlsPolicy};
    use hearth_store::Store;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use crate::dispatch::StaticManifestProvider;
    use crate::template::FsTemplateSource;

    struct MockDispatcher {
        connected: StdMutex<std::collections::HashSet<Uuid>>,
        responses: StdMutex<Vec<(Action, CommandResult)>>,
        calls: StdMutex<Vec<Action>>,
    }

    impl MockDispatcher {
        fn new(connected: Uuid) -> Self {
            let mut set = std::collections::HashSet::new();
            set.insert(connected);
            Self {
                connected: StdMutex::new(set),
                responses: StdMutex::new(Vec::new()),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn fail(&self, action: Action, message: &str) {
            self.responses.lock().unwrap().push((action, CommandResult::error(Uuid::new_v4(), message)));
        }
    }

    #[async_trait]
    impl AgentDispatcher for MockDispatcher {
        fn is_connected(&self, server_id: Uuid) -> bool {
            self.connected.lock().unwrap().contains(&server_id)
        }

        async fn send_command(&self, _server_id: Uuid, command: AgentCommand) -> Result<CommandResult> {
            self.calls.lock().unwrap().push(command.action);
            let canned = self
                .responses
                .lock()
                .unwrap()
                .iter()
                .find(|(action, _)| *action == command.action)
                .map(|(_, result)| result.clone());
            if let Some(canned) = canned {
                return Ok(CommandResult { command_id: command.id, ..canned });
            }
            Ok(CommandResult::success(command.id))
        }
    }

    fn demo_manifest() -> Manifest {
        Manifest {
            name: "demo".into(),
            display_name: "Demo".into(),
            version: "1.0".into(),
            category: "utility".into(),
            config_schema: vec![ConfigField {
                name: "rpc_password".into(),
                label: "RPC password".into(),
                field_type: ConfigFieldType::Password,
                required: false,
                default: None,
                options: vec![],
                generated: true,
                secret: true,
                inherit_from: None,
            }],
            provides: vec![ServiceDef { name: "demo-rpc".into(), port: 8080, protocol: Proto::Http }],
            requires: vec![],
            conflicts: vec![],
            webui: Some(WebUi { enabled: true, base_path: "/demo".into(), port: 8080 }),
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

    struct Harness {
        deployer: Deployer<MockDispatcher>,
        dispatcher: Arc<MockDispatcher>,
        server_id: Uuid,
    }

    fn harness() -> Harness {
        let store = Store::temporary(&[crate::audit::migration()]).unwrap();
        let registry = Arc::new(Registry::open(&store, 9000, 9010).unwrap());
        let server = Server::new("core", None, true);
        registry.put_server(&server).unwrap();

        let secrets_tree = store.tree("secrets").unwrap();
        let secrets = Arc::new(SecretStore::new(secrets_tree, &secrecy::Secret::new([3u8; 32])));
        let proxy = Arc::new(ProxyManager::new(Arc::clone(&registry), proxy_config()));
        let templates = Arc::new(FsTemplateSource::new(std::env::temp_dir().join("hearth-test-templates-unused")));
        let manifests = Arc::new(StaticManifestProvider::new(vec![demo_manifest()]));
        let dispatcher = Arc::new(MockDispatcher::new(server.id));
        let mutexes = Arc::new(MutexManager::new());
        let audit = Arc::new(AuditLog::new(store.tree("audit").unwrap()));

        let deployer = Deployer::new(
            store.tree("deployments").unwrap(),
            store.tree("servers").unwrap(),
            registry,
            proxy,
            secrets,
            templates,
            manifests,
            Arc::clone(&dispatcher),
            mutexes,
            audit,
            Arc::new(NoopHaManager),
            DeployerConfig { product: "hearth".into(), proxy_app_name: "caddy".into(), ca_root_cert_pem: None },
        );
        Harness { deployer, dispatcher, server_id: server.id }
    }

    #[smol_potat::test]
    async fn install_happy_path_lands_running_with_one_route() {
        let h = harness();
        let deployment = h.deployer.install(h.server_id, "demo", HashMap::new()).await.unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Running);
        assert_eq!(h.deployer.list_deployments(None).unwrap().len(), 1);
        let calls = h.dispatcher.calls.lock().unwrap();
        assert!(calls.contains(&Action::Install));
        assert!(calls.contains(&Action::Start));
    }

    #[smol_potat::test]
    async fn install_rolls_back_completely_when_agent_reports_failure() {
        let h = harness();
        h.dispatcher.fail(Action::Install, "disk full");
        let err = h.deployer.install(h.server_id, "demo", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed(_)));
        assert!(h.deployer.list_deployments(None).unwrap().is_empty());
    }

    #[smol_potat::test]
    async fn install_twice_on_same_server_conflicts() {
        let h = harness();
        h.deployer.install(h.server_id, "demo", HashMap::new()).await.unwrap();
        let err = h.deployer.install(h.server_id, "demo", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[smol_potat::test]
    async fn stop_then_start_toggles_status_and_route() {
        let h = harness();
        let deployment = h.deployer.install(h.server_id, "demo", HashMap::new()).await.unwrap();

        let stopped = h.deployer.stop(deployment.id).await.unwrap();
        assert_eq!(stopped.status, DeploymentStatus::Stopped);

        let started = h.deployer.start(deployment.id).await.unwrap();
        assert_eq!(started.status, DeploymentStatus::Running);
    }

    #[smol_potat::test]
    async fn uninstall_removes_every_row() {
        let h = harness();
        let deployment = h.deployer.install(h.server_id, "demo", HashMap::new()).await.unwrap();
        h.deployer.uninstall(deployment.id).await.unwrap();
        assert!(h.deployer.get_deployment(deployment.id).unwrap().is_none());
    }

    #[smol_potat::test]
    async fn uninstall_blocked_for_mandatory_app_on_core_server() {
        let store = Store::temporary(&[crate::audit::migration()]).unwrap();
        let registry = Arc::new(Registry::open(&store, 9000, 9010).unwrap());
        let server = Server::new("core", None, true);
        registry.put_server(&server).unwrap();

        let mut mandatory = demo_manifest();
        mandatory.mandatory = true;
        let secrets = Arc::new(SecretStore::new(store.tree("secrets").unwrap(), &secrecy::Secret::new([3u8; 32])));
        let proxy = Arc::new(ProxyManager::new(Arc::clone(&registry), proxy_config()));
        let templates = Arc::new(FsTemplateSource::new(std::env::temp_dir().join("hearth-test-templates-unused2")));
        let manifests = Arc::new(StaticManifestProvider::new(vec![mandatory]));
        let dispatcher = Arc::new(MockDispatcher::new(server.id));
        let deployer = Deployer::new(
            store.tree("deployments").unwrap(),
            store.tree("servers").unwrap(),
            registry,
            proxy,
            secrets,
            templates,
            manifests,
            dispatcher,
            Arc::new(MutexManager::new()),
            Arc::new(AuditLog::new(store.tree("audit").unwrap())),
            Arc::new(NoopHaManager),
            DeployerConfig { product: "hearth".into(), proxy_app_name: "caddy".into(), ca_root_cert_pem: None },
        );

        let deployment = deployer.install(server.id, "demo", HashMap::new()).await.unwrap();
        let err = deployer.uninstall(deployment.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
