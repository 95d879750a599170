//! The agent's top-level session loop: connect, authenticate,
//! then race inbound server frames, a status-report timer, and completed
//! command results until told to drain or the connection drops, at which
//! point [`Backoff`] governs the reconnect delay.
//!
//! Command execution fans out onto `smol::spawn` tasks that report back
//! over an `async_channel`, rather than being polled as a
//! `FuturesUnordered` — an empty `FuturesUnordered` panics on
//! `select_next_some()`, while an empty channel receiver simply pends.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures_lite::StreamExt;
use hearth_executor::HelperClient;
use hearth_proto::command::CommandResult;
use hearth_proto::session::{AgentEvent, ServerEvent, SessionAuth};
use smol::Timer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::connection::AgentConnection;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::status::{AppStatusProvider, SystemStatusCollector};

/// How often the agent emits an unsolicited status report.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// How long a draining session waits for in-flight commands to finish
/// before closing the connection regardless.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Configuration for one agent session.
pub struct SessionConfig {
    /// `host:port` of the orchestrator's session endpoint.
    pub orchestrator_url: String,
    /// Private root certificate PEM, or `None` to use plaintext `ws://`.
    pub root_cert_pem: Option<String>,
    /// This server's id, presented during the auth handshake.
    pub server_id: Uuid,
    /// Bearer token proving this agent's identity.
    pub token: String,
}

/// Runs the reconnect/heartbeat/drain loop for one agent.
pub struct AgentSession<H: HelperClient> {
    config: SessionConfig,
    dispatcher: Arc<Dispatcher<H>>,
    status: SystemStatusCollector,
    apps: Arc<dyn AppStatusProvider>,
    draining: Arc<AtomicBool>,
    active_commands: Arc<AtomicUsize>,
}

impl<H: HelperClient + 'static> AgentSession<H> {
    /// Build a session that will connect per `config`, dispatching commands
    /// through `dispatcher` and reporting status via `apps`.
    pub fn new(config: SessionConfig, dispatcher: Dispatcher<H>, apps: Arc<dyn AppStatusProvider>) -> Self {
        let status = SystemStatusCollector::new(config.server_id);
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            status,
            apps,
            draining: Arc::new(AtomicBool::new(false)),
            active_commands: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A handle that, when set, causes the session to close cleanly after
    /// its current connection's in-flight commands finish. Typically wired
    /// to a signal handler.
    pub fn drain_handle(&self) -> Arc<AtomicBool> {
        self.draining.clone()
    }

    /// Run forever: connect, serve the session, and on any disconnect wait
    /// out a [`Backoff`] delay before reconnecting. Returns once draining
    /// completes.
    pub async fn run(&self) {
        let mut backoff = Backoff::new();
        while !self.draining.load(Ordering::SeqCst) {
            match self.run_once().await {
                Ok(()) => {
                    info!("session ended cleanly");
                    backoff.reset();
                }
                Err(e) => {
                    warn!(error = %e, "session error, reconnecting");
                }
            }
            if self.draining.load(Ordering::SeqCst) {
                break;
            }
            let delay = backoff.next_delay();
            Timer::after(delay).await;
        }
        info!("agent draining complete");
    }

    /// Connect once, authenticate, and serve frames until disconnect.
    async fn run_once(&self) -> Result<()> {
        let mut conn = AgentConnection::connect(&self.config.orchestrator_url, self.config.root_cert_pem.as_deref())
            .await?;

        let auth = SessionAuth { server_id: self.config.server_id, token: self.config.token.clone() };
        conn.send(&auth).await?;

        let (result_tx, result_rx) = async_channel::unbounded::<AgentEvent>();
        let report = self.status.collect(self.apps.as_ref());
        conn.send(&AgentEvent::Status { report }).await?;

        let mut status_timer = Timer::interval(STATUS_INTERVAL);

        loop {
            if self.draining.load(Ordering::SeqCst) {
                self.wait_for_drain(&mut conn, &result_rx).await;
                conn.close().await.ok();
                return Ok(());
            }

            futures::select! {
                frame = conn.recv::<ServerEvent>() => {
                    match frame? {
                        Some(event) => {
                            if !self.handle_server_event(event, &mut conn, &result_tx).await? {
                                return Ok(());
                            }
                        }
                        None => return Ok(()),
                    }
                }
                _ = status_timer.next() => {
                    let report = self.status.collect(self.apps.as_ref());
                    conn.send(&AgentEvent::Status { report }).await?;
                }
                event = result_rx.recv() => {
                    if let Ok(event) = event {
                        conn.send(&event).await?;
                    }
                }
            }
        }
    }

    /// Drain in-flight commands before the caller closes the connection:
    /// keep relaying completed results until `active_commands` reaches
    /// zero, or until the grace window elapses, whichever comes first.
    async fn wait_for_drain(&self, conn: &mut AgentConnection, result_rx: &async_channel::Receiver<AgentEvent>) {
        let started = std::time::Instant::now();
        loop {
            if self.active_commands.load(Ordering::SeqCst) == 0 {
                return;
            }
            let remaining = DRAIN_GRACE.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                warn!("drain grace window elapsed with commands still in flight");
                return;
            }
            futures::select! {
                event = result_rx.recv().fuse() => {
                    match event {
                        Ok(event) => { let _ = conn.send(&event).await; }
                        Err(_) => return,
                    }
                }
                _ = Timer::after(remaining).fuse() => {
                    warn!("drain grace window elapsed with commands still in flight");
                    return;
                }
            }
        }
    }

    /// Handle one server frame. Returns `Ok(false)` when the session should
    /// end (a `ServerShutdown` frame was received).
    async fn handle_server_event(
        &self,
        event: ServerEvent,
        conn: &mut AgentConnection,
        result_tx: &async_channel::Sender<AgentEvent>,
    ) -> Result<bool> {
        match event {
            ServerEvent::Command { cmd } => {
                if self.draining.load(Ordering::SeqCst) {
                    let result = CommandResult::error(cmd.id, Error::Draining.to_string());
                    conn.send(&AgentEvent::CommandResult { result }).await?;
                    return Ok(true);
                }
                let dispatcher = self.dispatcher.clone();
                let tx = result_tx.clone();
                let active = self.active_commands.clone();
                active.fetch_add(1, Ordering::SeqCst);
                smol::spawn(async move {
                    dispatcher.dispatch(cmd, tx).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .detach();
                Ok(true)
            }
            ServerEvent::RequestStatus => {
                let report = self.status.collect(self.apps.as_ref());
                conn.send(&AgentEvent::Status { report }).await?;
                Ok(true)
            }
            ServerEvent::Ping => {
                conn.send(&AgentEvent::Pong).await?;
                Ok(true)
            }
            ServerEvent::ServerShutdown => {
                conn.close().await.ok();
                Ok(false)
            }
        }
    }
}
