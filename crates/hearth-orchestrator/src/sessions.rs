//! Live agent session bookkeeping: one outbound queue
//! and a pending-command correlation table per connected server, exposed to
//! the deployer through [`hearth_deployer::AgentDispatcher`]. A request id
//! maps to a one-shot channel the accept loop completes once the matching
//! result frame arrives.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use hearth_deployer::{AgentDispatcher, Error as DeployerError, Result as DeployerResult};
use hearth_proto::{AgentCommand, CommandResult, ServerEvent};
use smol::Timer;
use uuid::Uuid;

/// How long the orchestrator waits for a dispatched command's result before
/// treating the target as unresponsive.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

struct SessionHandle {
    outbound: async_channel::Sender<ServerEvent>,
    pending: Mutex<HashMap<Uuid, async_channel::Sender<CommandResult>>>,
}

/// Tracks every currently-connected server's session and satisfies the
/// deployer's [`AgentDispatcher`] seam over them.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, std::sync::Arc<SessionHandle>>>,
}

impl SessionRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly-authenticated session, returning its outbound
    /// receiver for the accept loop's write half to drain.
    pub fn register(&self, server_id: Uuid) -> (async_channel::Sender<ServerEvent>, async_channel::Receiver<ServerEvent>) {
        let (tx, rx) = async_channel::unbounded();
        let handle = std::sync::Arc::new(SessionHandle { outbound: tx.clone(), pending: Mutex::new(HashMap::new()) });
        self.sessions.lock().expect("session table poisoned").insert(server_id, handle);
        (tx, rx)
    }

    /// Drop a session's bookkeeping once its connection closes. Any
    /// commands still awaiting a result there will time out rather than
    /// ever resolve, once their orchestrator-side deadline passes.
    pub fn unregister(&self, server_id: Uuid) {
        self.sessions.lock().expect("session table poisoned").remove(&server_id);
    }

    /// Complete a pending command with its result, as read off the
    /// session's inbound stream. A result for an id nobody is waiting on
    /// (a late retry, a duplicate ack race) is silently dropped.
    pub fn complete_command(&self, server_id: Uuid, result: CommandResult) {
        let sessions = self.sessions.lock().expect("session table poisoned");
        let Some(handle) = sessions.get(&server_id) else { return };
        let sender = handle.pending.lock().expect("pending table poisoned").remove(&result.command_id);
        if let Some(sender) = sender {
            let _ = sender.try_send(result);
        }
    }

    /// Push a `server:shutdown` frame to every connected session, for a
    /// graceful daemon exit.
    pub fn broadcast_shutdown(&self) {
        let sessions = self.sessions.lock().expect("session table poisoned");
        for handle in sessions.values() {
            let _ = handle.outbound.try_send(ServerEvent::ServerShutdown);
        }
    }
}

#[async_trait]
impl AgentDispatcher for SessionRegistry {
    fn is_connected(&self, server_id: Uuid) -> bool {
        self.sessions.lock().expect("session table poisoned").contains_key(&server_id)
    }

    async fn send_command(&self, server_id: Uuid, command: AgentCommand) -> DeployerResult<CommandResult> {
        let handle = {
            let sessions = self.sessions.lock().expect("session table poisoned");
            sessions.get(&server_id).cloned().ok_or(DeployerError::AgentDisconnected(server_id))?
        };

        let (result_tx, result_rx) = async_channel::bounded(1);
        handle.pending.lock().expect("pending table poisoned").insert(command.id, result_tx);

        if handle.outbound.send(ServerEvent::Command { cmd: command.clone() }).await.is_err() {
            handle.pending.lock().expect("pending table poisoned").remove(&command.id);
            return Err(DeployerError::AgentDisconnected(server_id));
        }

        futures::select! {
            result = result_rx.recv().fuse() => {
                result.map_err(|_| DeployerError::AgentDisconnected(server_id))
            }
            _ = Timer::after(COMMAND_TIMEOUT).fuse() => {
                handle.pending.lock().expect("pending table poisoned").remove(&command.id);
                Err(DeployerError::CommandFailed(format!(
                    "no result from agent within {:?} ({:?} on server {server_id})",
                    COMMAND_TIMEOUT, command.action
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_proto::Action;

    #[test]
    fn unregistered_server_is_not_connected() {
        let registry = SessionRegistry::new();
        assert!(!registry.is_connected(Uuid::new_v4()));
    }

    #[smol_potat::test]
    async fn send_command_delivers_frame_and_resolves_on_matching_result() {
        let registry = SessionRegistry::new();
        let server_id = Uuid::new_v4();
        let (_outbound_tx, outbound_rx) = registry.register(server_id);
        assert!(registry.is_connected(server_id));

        let command = AgentCommand { id: Uuid::new_v4(), action: Action::Start, app_name: Some("demo".into()), payload: None };
        let send_fut = registry.send_command(server_id, command.clone());

        let delivered = outbound_rx.recv().await.unwrap();
        match delivered {
            ServerEvent::Command { cmd } => assert_eq!(cmd.id, command.id),
            other => panic!("unexpected event {other:?}"),
        }

        registry.complete_command(server_id, CommandResult::success(command.id));
        let result = send_fut.await.unwrap();
        assert!(result.is_success());
    }

    #[smol_potat::test]
    async fn send_command_to_disconnected_server_fails_immediately() {
        let registry = SessionRegistry::new();
        let command = AgentCommand { id: Uuid::new_v4(), action: Action::Start, app_name: None, payload: None };
        let result = registry.send_command(Uuid::new_v4(), command).await;
        assert!(matches!(result, Err(DeployerError::AgentDisconnected(_))));
    }

    #[smol_potat::test]
    async fn completing_an_unknown_command_id_is_a_no_op() {
        let registry = SessionRegistry::new();
        let server_id = Uuid::new_v4();
        let _ = registry.register(server_id);
        registry.complete_command(server_id, CommandResult::success(Uuid::new_v4()));
    }
}
