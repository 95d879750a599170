//! Maps an [`AgentCommand`] onto [`Executor`] calls and emits the resulting
//! frames: an ack as soon as the command is accepted, then
//! either a `command:result` or — for the two log-stream actions — an
//! independent terminal `logs_stream_status` frame instead.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_channel::Sender;
use hearth_executor::{
    ConfigurePayload, Error as ExecutorError, Executor, HelperClient, InstallPayload, LogFollowHandle,
    LogSources,
};
use hearth_proto::command::{Action, AgentCommand, CommandAck, CommandOutcome, CommandResult};
use hearth_proto::helper::MountOptions;
use hearth_proto::session::{AgentEvent, LogStreamStatus};
use uuid::Uuid;

/// Supplies the journald unit / log file paths for an app, derived from its
/// manifest's `logging` field.
pub trait LogSourceProvider: Send + Sync {
    /// Log sources for `app_name`, or an empty set if the app has none
    /// configured.
    fn log_sources(&self, app_name: &str) -> LogSources;
}

/// A fixed log-source map, for tests and single-app dev setups.
#[derive(Default)]
pub struct StaticLogSources(pub HashMap<String, LogSources>);

impl LogSourceProvider for StaticLogSources {
    fn log_sources(&self, app_name: &str) -> LogSources {
        self.0.get(app_name).cloned().unwrap_or_default()
    }
}

/// Dispatches commands to an [`Executor`] and tracks open log-stream handles.
pub struct Dispatcher<H: HelperClient> {
    executor: Executor<H>,
    log_sources: Box<dyn LogSourceProvider>,
    streams: Mutex<HashMap<Uuid, LogFollowHandle>>,
}

impl<H: HelperClient> Dispatcher<H> {
    /// Build a dispatcher over `executor`, using `log_sources` to resolve an
    /// app's journald unit / log file paths for `getLogs`/`streamLogs`.
    pub fn new(executor: Executor<H>, log_sources: Box<dyn LogSourceProvider>) -> Self {
        Self { executor, log_sources, streams: Mutex::new(HashMap::new()) }
    }

    /// Execute `cmd`, sending an ack immediately and the terminal frame(s)
    /// once execution completes. Intended to run inside its own spawned
    /// task so the session loop stays free to service other commands.
    pub async fn dispatch(&self, cmd: AgentCommand, events: Sender<AgentEvent>) {
        let ack = AgentEvent::CommandAck {
            ack: CommandAck { command_id: cmd.id, received_at: chrono::Utc::now() },
        };
        let _ = events.send(ack).await;

        let started = Instant::now();
        match cmd.action {
            Action::StreamLogs => {
                self.dispatch_stream_logs(&cmd, events).await;
                return;
            }
            Action::StopStreamLogs => {
                self.dispatch_stop_stream_logs(&cmd, events).await;
                return;
            }
            Action::GetLogs => {
                self.dispatch_get_logs(&cmd, events, started).await;
                return;
            }
            _ => {}
        }

        let outcome = self.execute(&cmd).await;
        let result = match outcome {
            Ok(data) => CommandResult {
                command_id: cmd.id,
                status: CommandOutcome::Success,
                message: None,
                duration_ms: Some(started.elapsed().as_millis() as u64),
                data,
            },
            Err(e) => CommandResult::error(cmd.id, e.to_string()),
        };
        let _ = events.send(AgentEvent::CommandResult { result }).await;
    }

    async fn execute(&self, cmd: &AgentCommand) -> Result<Option<serde_json::Value>, ExecutorError> {
        let app_name = cmd.app_name.as_deref().unwrap_or_default();
        match cmd.action {
            Action::Install => {
                let payload: InstallPayload = parse_payload(cmd)?;
                self.executor.install(app_name, &payload).await?;
                Ok(None)
            }
            Action::Configure => {
                let payload: ConfigurePayload = parse_payload(cmd)?;
                self.executor.configure(app_name, &payload).await?;
                Ok(None)
            }
            Action::Start => {
                self.executor.systemctl("start", app_name).await?;
                Ok(None)
            }
            Action::Stop => {
                self.executor.systemctl("stop", app_name).await?;
                Ok(None)
            }
            Action::Restart => {
                self.executor.systemctl("restart", app_name).await?;
                Ok(None)
            }
            Action::Uninstall => {
                let script = cmd
                    .payload
                    .as_ref()
                    .and_then(|v| v.get("uninstallScript"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                self.executor.uninstall(app_name, script.as_deref()).await?;
                Ok(None)
            }
            Action::MountStorage => {
                let options: MountOptions = parse_payload(cmd)?;
                self.executor.mount_storage(options).await?;
                Ok(None)
            }
            Action::UnmountStorage => {
                let mount_point = payload_string(cmd, "mountPoint")?;
                self.executor.unmount_storage(&mount_point).await?;
                Ok(None)
            }
            Action::CheckMount => {
                let mount_point = payload_string(cmd, "mountPoint")?;
                let info = self.executor.check_mount(&mount_point).await?;
                Ok(Some(serde_json::to_value(info).unwrap_or(serde_json::Value::Null)))
            }
            Action::ConfigureKeepalived => {
                let config = payload_string(cmd, "config")?;
                self.executor.configure_keepalived(&config).await?;
                Ok(None)
            }
            Action::CheckKeepalived => {
                let active = self.executor.check_keepalived().await?;
                Ok(Some(serde_json::json!({ "active": active })))
            }
            Action::GetLogs | Action::StreamLogs | Action::StopStreamLogs => {
                unreachable!("handled before execute()")
            }
        }
    }

    async fn dispatch_get_logs(&self, cmd: &AgentCommand, events: Sender<AgentEvent>, started: Instant) {
        let app_name = cmd.app_name.as_deref().unwrap_or_default();
        let lines = cmd
            .payload
            .as_ref()
            .and_then(|v| v.get("lines"))
            .and_then(|v| v.as_u64())
            .unwrap_or(200) as usize;
        let sources = self.log_sources.log_sources(app_name);

        match self.executor.get_logs(&sources, lines).await {
            Ok(lines) => {
                let _ = events.send(AgentEvent::LogsResult { command_id: cmd.id, lines }).await;
                let result = CommandResult {
                    command_id: cmd.id,
                    status: CommandOutcome::Success,
                    message: None,
                    duration_ms: Some(started.elapsed().as_millis() as u64),
                    data: None,
                };
                let _ = events.send(AgentEvent::CommandResult { result }).await;
            }
            Err(e) => {
                let result = CommandResult::error(cmd.id, e.to_string());
                let _ = events.send(AgentEvent::CommandResult { result }).await;
            }
        }
    }

    async fn dispatch_stream_logs(&self, cmd: &AgentCommand, events: Sender<AgentEvent>) {
        let app_name = cmd.app_name.as_deref().unwrap_or_default();
        let sources = self.log_sources.log_sources(app_name);
        let stream_id = cmd.id;
        let line_events = events.clone();

        let handle = self
            .executor
            .start_log_stream(stream_id, &sources, move |line| {
                let _ = line_events.try_send(AgentEvent::LogsStreamLine { stream_id, line });
            })
            .await;

        match handle {
            Ok(handle) => {
                self.streams.lock().expect("stream map poisoned").insert(stream_id, handle);
                let status = AgentEvent::LogsStreamStatus { stream_id, status: LogStreamStatus::Started, message: None };
                let _ = events.send(status).await;
            }
            Err(e) => {
                let status = AgentEvent::LogsStreamStatus {
                    stream_id,
                    status: LogStreamStatus::Error,
                    message: Some(e.to_string()),
                };
                let _ = events.send(status).await;
            }
        }
    }

    async fn dispatch_stop_stream_logs(&self, cmd: &AgentCommand, events: Sender<AgentEvent>) {
        let stream_id = cmd.id;
        let handle = self.streams.lock().expect("stream map poisoned").remove(&stream_id);
        let status = match handle {
            Some(handle) => match self.executor.stop_log_stream(stream_id, handle).await {
                Ok(()) => AgentEvent::LogsStreamStatus { stream_id, status: LogStreamStatus::Stopped, message: None },
                Err(e) => AgentEvent::LogsStreamStatus {
                    stream_id,
                    status: LogStreamStatus::Error,
                    message: Some(e.to_string()),
                },
            },
            None => AgentEvent::LogsStreamStatus {
                stream_id,
                status: LogStreamStatus::Error,
                message: Some("no such log stream".into()),
            },
        };
        let _ = events.send(status).await;
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(cmd: &AgentCommand) -> Result<T, ExecutorError> {
    let value = cmd.payload.clone().unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value).map_err(|e| ExecutorError::CommandFailed(format!("bad payload: {e}")))
}

fn payload_string(cmd: &AgentCommand, field: &str) -> Result<String, ExecutorError> {
    cmd.payload
        .as_ref()
        .and_then(|v| v.get(field))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ExecutorError::CommandFailed(format!("missing payload field {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_proto::helper::{HelperRequest, HelperResponse};

    struct OkHelper;
    impl HelperClient for OkHelper {
        fn call(&self, _request: HelperRequest) -> hearth_executor::Result<HelperResponse> {
            Ok(HelperResponse::ok())
        }
    }

    fn dispatcher() -> Dispatcher<OkHelper> {
        let executor = Executor::new("testapp", OkHelper, true);
        Dispatcher::new(executor, Box::new(StaticLogSources::default()))
    }

    #[smol_potat::test]
    async fn unknown_mount_point_field_reports_a_validation_style_error() {
        let dispatcher = dispatcher();
        let (tx, rx) = async_channel::unbounded();
        let cmd = AgentCommand {
            id: Uuid::new_v4(),
            action: Action::CheckMount,
            app_name: Some("testapp".into()),
            payload: Some(serde_json::json!({})),
        };
        dispatcher.dispatch(cmd, tx).await;

        let ack = rx.recv().await.unwrap();
        assert!(matches!(ack, AgentEvent::CommandAck { .. }));
        let result = rx.recv().await.unwrap();
        match result {
            AgentEvent::CommandResult { result } => assert!(!result.is_success()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[smol_potat::test]
    async fn stopping_a_stream_that_was_never_started_reports_an_error_status() {
        let dispatcher = dispatcher();
        let (tx, rx) = async_channel::unbounded();
        let cmd = AgentCommand {
            id: Uuid::new_v4(),
            action: Action::StopStreamLogs,
            app_name: Some("testapp".into()),
            payload: None,
        };
        dispatcher.dispatch(cmd, tx).await;

        let _ack = rx.recv().await.unwrap();
        let status = rx.recv().await.unwrap();
        match status {
            AgentEvent::LogsStreamStatus { status, .. } => assert_eq!(status, LogStreamStatus::Error),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
