//! Proxy manager.
//!
//! Holds no routing state of its own: it reads the registry and produces a
//! complete admin-API payload every reload. Change-hash dedup, debounce, a
//! retry-with-backoff push, and a circuit breaker with a last-known-good
//! payload and a recovery schedule guard every push to the reverse proxy's
//! admin API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use hearth_proto::{Protocol, ServiceRoute};
use hearth_registry::Registry;

use crate::error::{Error, Result};
use crate::payload::{Fallback, Listener, ProxyPayload, TlsPolicy};

/// Tunables for [`ProxyManager`].
#[derive(Debug, Clone)]
pub struct ProxyManagerConfig {
    /// URL of the proxy admin API's config-load endpoint.
    pub admin_load_url: String,
    /// Quiet window before a scheduled reload actually fires.
    pub debounce_window: Duration,
    /// Max push attempts before the step is a failure.
    pub retry_attempts: u32,
    /// Base delay of the retry backoff.
    pub retry_base_delay: Duration,
    /// Cap on the retry backoff delay.
    pub retry_cap_delay: Duration,
    /// Consecutive failures before the circuit opens.
    pub circuit_threshold: u32,
    /// How long the circuit stays open before a push may be attempted again.
    pub circuit_recovery: Duration,
    /// TLS policy to stamp into every payload.
    pub tls_policy: TlsPolicy,
    /// Static-UI or dev-server fallback.
    pub fallback: Fallback,
    /// Listener host/port the proxy binds for HTTP(S).
    pub listener: Listener,
}

#[derive(Default)]
struct CircuitState {
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

struct ManagerState {
    last_hash: Option<String>,
    last_payload: Option<ProxyPayload>,
    circuit: CircuitState,
}

/// Converts the registered route tables into a live proxy configuration.
pub struct ProxyManager {
    registry: Arc<Registry>,
    config: ProxyManagerConfig,
    state: Mutex<ManagerState>,
    debounce_generation: Arc<AtomicU64>,
}

impl ProxyManager {
    /// Construct a manager over a registry handle.
    pub fn new(registry: Arc<Registry>, config: ProxyManagerConfig) -> Self {
        Self {
            registry,
            config,
            state: Mutex::new(ManagerState {
                last_hash: None,
                last_payload: None,
                circuit: CircuitState::default(),
            }),
            debounce_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build the current admin-API payload from the registry's route tables.
    pub fn build_payload(&self) -> Result<ProxyPayload> {
        let mut handlers = Vec::new();
        let mut tcp_listeners = Vec::new();

        for route in self.registry.active_proxy_routes()? {
            handlers.push(ProxyPayload::ui_handler(&route.path, &route.upstream));
        }

        for route in self.registry.active_service_routes()? {
            push_service_route(&mut handlers, &mut tcp_listeners, &route);
        }

        Ok(ProxyPayload {
            listeners: vec![self.config.listener.clone()],
            handlers,
            tcp_listeners,
            fallback: self.config.fallback.clone(),
            tls: self.config.tls_policy.clone(),
        })
    }

    /// Gather routes, hash the payload, and push it if it changed.
    ///
    /// Returns `Ok(true)` if a push happened, `Ok(false)` if the hash was
    /// unchanged (no-op) or the circuit is currently open.
    pub async fn update_and_reload(&self) -> Result<bool> {
        if self.circuit_is_open() {
            let reason = {
                let state = self.state.lock().expect("proxy state lock poisoned");
                state
                    .circuit
                    .opened_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            };
            warn!(opened_at = %reason, "proxy circuit open, skipping reload");
            return Ok(false);
        }

        let payload = self.build_payload()?;
        let hash = hash_payload(&payload);

        {
            let state = self.state.lock().expect("proxy state lock poisoned");
            if state.last_hash.as_deref() == Some(hash.as_str()) {
                return Ok(false);
            }
        }

        match self.push_with_retry(&payload).await {
            Ok(()) => {
                let mut state = self.state.lock().expect("proxy state lock poisoned");
                state.last_hash = Some(hash);
                state.last_payload = Some(payload);
                state.circuit = CircuitState::default();
                Ok(true)
            }
            Err(e) => {
                let mut state = self.state.lock().expect("proxy state lock poisoned");
                state.circuit.consecutive_failures += 1;
                if state.circuit.consecutive_failures >= self.config.circuit_threshold
                    && state.circuit.opened_at.is_none()
                {
                    state.circuit.opened_at = Some(Utc::now());
                    warn!("proxy circuit opened after {} consecutive failures", state.circuit.consecutive_failures);
                }
                Err(e)
            }
        }
    }

    fn circuit_is_open(&self) -> bool {
        let mut state = self.state.lock().expect("proxy state lock poisoned");
        match state.circuit.opened_at {
            None => false,
            Some(opened_at) => {
                let elapsed = Utc::now().signed_duration_since(opened_at);
                let recovery = chrono::Duration::from_std(self.config.circuit_recovery).unwrap_or_default();
                if elapsed >= recovery {
                    state.circuit = CircuitState::default();
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Manually close the circuit, e.g. from an operator command.
    pub fn reset_circuit(&self) {
        let mut state = self.state.lock().expect("proxy state lock poisoned");
        state.circuit = CircuitState::default();
    }

    /// The last payload pushed successfully, if any (last-known-good).
    pub fn last_known_good(&self) -> Option<ProxyPayload> {
        self.state.lock().expect("proxy state lock poisoned").last_payload.clone()
    }

    async fn push_with_retry(&self, payload: &ProxyPayload) -> Result<()> {
        let mut delay = self.config.retry_base_delay;
        let mut last_err = None;
        for attempt in 0..self.config.retry_attempts.max(1) {
            match self.push_once(payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "proxy admin API push failed");
                    last_err = Some(e);
                    if attempt + 1 < self.config.retry_attempts {
                        smol::Timer::after(delay).await;
                        delay = std::cmp::min(delay * 2, self.config.retry_cap_delay);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::PushFailed("unknown".into())))
    }

    async fn push_once(&self, payload: &ProxyPayload) -> Result<()> {
        let url = self.config.admin_load_url.clone();
        let body = serde_json::to_vec(payload).map_err(|e| Error::PushFailed(e.to_string()))?;
        smol::unblock(move || {
            let client = reqwest::blocking::Client::new();
            let response = client
                .post(&url)
                .header("content-type", "application/json")
                .body(body)
                .send()
                .map_err(|e| Error::PushFailed(e.to_string()))?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(Error::PushFailed(format!("status {}", response.status())))
            }
        })
        .await
    }

    /// Schedule a debounced reload: coalesces rapid calls into a single
    /// reload fired after the quiet window. Never panics; failures are
    /// logged rather than propagated to the caller.
    pub fn schedule_reload(self: &Arc<Self>) {
        let generation = self.debounce_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        let gen_counter = Arc::clone(&self.debounce_generation);
        let window = self.config.debounce_window;
        smol::spawn(async move {
            smol::Timer::after(window).await;
            if gen_counter.load(Ordering::SeqCst) != generation {
                return; // superseded by a later schedule_reload call
            }
            if let Err(e) = this.update_and_reload().await {
                warn!(error = %e, "debounced proxy reload failed");
            } else {
                info!("debounced proxy reload completed");
            }
        })
        .detach();
    }
}

fn push_service_route(
    handlers: &mut Vec<crate::payload::PathHandler>,
    tcp_listeners: &mut Vec<crate::payload::TcpListenerSpec>,
    route: &ServiceRoute,
) {
    match route.route_type {
        Protocol::Http => {
            if let Some(path) = &route.external_path {
                handlers.push(ProxyPayload::http_service_handler(
                    path,
                    &route.upstream_host,
                    route.upstream_port,
                ));
            }
        }
        Protocol::Tcp => {
            if let Some(port) = route.external_port {
                tcp_listeners.push(ProxyPayload::tcp_listener(port, &route.upstream_host, route.upstream_port));
            }
        }
    }
}

fn hash_payload(payload: &ProxyPayload) -> String {
    let bytes = serde_json::to_vec(payload).expect("payload always serializes");
    let digest = Sha256::digest(&bytes);
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_store::Store;

    fn config() -> ProxyManagerConfig {
        ProxyManagerConfig {
            admin_load_url: "http://127.0.0.1:1/load".into(),
            debounce_window: Duration::from_millis(50),
            retry_attempts: 1,
            retry_base_delay: Duration::from_millis(1),
            retry_cap_delay: Duration::from_millis(5),
            circuit_threshold: 3,
            circuit_recovery: Duration::from_secs(60),
            tls_policy: TlsPolicy::SelfSigned,
            fallback: Fallback::StaticUi { root: "/opt/ui".into() },
            listener: Listener { host: "0.0.0.0".into(), port: 443 },
        }
    }

    #[test]
    fn empty_registry_builds_empty_payload() {
        let store = Store::temporary(&[]).unwrap();
        let registry = Arc::new(Registry::open(&store, 9000, 9010).unwrap());
        let manager = ProxyManager::new(registry, config());
        let payload = manager.build_payload().unwrap();
        assert!(payload.handlers.is_empty());
        assert!(payload.tcp_listeners.is_empty());
    }

    #[test]
    fn hash_is_stable_for_identical_payloads() {
        let store = Store::temporary(&[]).unwrap();
        let registry = Arc::new(Registry::open(&store, 9000, 9010).unwrap());
        let manager = ProxyManager::new(registry, config());
        let a = manager.build_payload().unwrap();
        let b = manager.build_payload().unwrap();
        assert_eq!(hash_payload(&a), hash_payload(&b));
    }

    #[smol_potat::test]
    async fn update_and_reload_fails_against_unreachable_admin_api() {
        let store = Store::temporary(&[]).unwrap();
        let registry = Arc::new(Registry::open(&store, 9000, 9010).unwrap());
        registry.register_proxy_route(uuid::Uuid::new_v4(), "/demo", "http://127.0.0.1:8080").unwrap();
        let manager = ProxyManager::new(registry, config());
        let result = manager.update_and_reload().await;
        assert!(result.is_err());
    }

    #[smol_potat::test]
    async fn repeated_reload_with_unchanged_routes_is_a_noop_after_failure_state_reset() {
        // Simulate "last-known-good" dedup directly on manager state, since
        // exercising the real network push is out of scope for a unit test.
        let store = Store::temporary(&[]).unwrap();
        let registry = Arc::new(Registry::open(&store, 9000, 9010).unwrap());
        let manager = ProxyManager::new(registry, config());
        let payload = manager.build_payload().unwrap();
        let hash = hash_payload(&payload);
        {
            let mut state = manager.state.lock().unwrap();
            state.last_hash = Some(hash);
        }
        let result = manager.update_and_reload().await.unwrap();
        assert!(!result, "unchanged payload must not push");
    }

    #[smol_potat::test]
    async fn circuit_opens_after_threshold_consecutive_failures() {
        let store = Store::temporary(&[]).unwrap();
        let registry = Arc::new(Registry::open(&store, 9000, 9010).unwrap());
        let mut cfg = config();
        cfg.circuit_threshold = 2;
        let manager = ProxyManager::new(registry, cfg);

        registry_force_change(&manager);
        let _ = manager.update_and_reload().await;
        registry_force_change(&manager);
        let _ = manager.update_and_reload().await;

        assert!(manager.circuit_is_open());
    }

    fn registry_force_change(manager: &ProxyManager) {
        // force the hash to differ each call so update_and_reload doesn't
        // short-circuit on the no-op path before attempting the push.
        let mut state = manager.state.lock().unwrap();
        state.last_hash = Some(uuid::Uuid::new_v4().to_string());
    }
}
