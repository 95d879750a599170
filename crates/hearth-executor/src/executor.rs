//! Agent-side command executor: turns a command envelope into file writes,
//! script runs, and privileged-helper calls. A single [`Executor`] plays
//! both the local-script backend and the systemd-vs-dev-mode dispatcher,
//! since the agent only ever runs one app at a time per command.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use async_process::Command as AsyncCommand;
use hearth_proto::helper::{HelperRequest, HelperResponse, MountOptions};
use uuid::Uuid;

use crate::env::{build_script_env, AppEnvContext};
use crate::error::{Error, Result};
use crate::logs::{LogFollowHandle, LogFollower, LogSources, LogTail};
use crate::sandbox::PathSandbox;

/// A single file to materialize under an app's install or config tree.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// Destination path, relative to the app's directory or absolute.
    pub path: String,
    /// File contents.
    pub contents: String,
}

/// Payload for an `install` command.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallPayload {
    /// Files to write before running the install script.
    pub config_files: Vec<ConfigFile>,
    /// Install script contents, run once files are in place.
    pub install_script: Option<String>,
    /// Extra environment variables for the install script.
    pub env: BTreeMap<String, String>,
    /// Unix user the service should run as.
    pub service_user: Option<String>,
    /// Unix group the service should run as.
    pub service_group: Option<String>,
    /// Data directories to create under the app's data root.
    pub data_directories: Vec<String>,
    /// Linux capabilities to apply to the installed binary.
    pub capabilities: Vec<String>,
    /// Absolute path to the binary a capability string applies to.
    pub capability_target: Option<String>,
    /// systemd unit contents to install, if this app runs as a service.
    pub unit_file: Option<String>,
}

/// Payload for a `configure` command.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigurePayload {
    /// Files to rewrite.
    pub config_files: Vec<ConfigFile>,
    /// Configure script to run after files are written, if any.
    pub configure_script: Option<String>,
    /// Extra environment variables for the configure script.
    pub env: BTreeMap<String, String>,
}

/// Calls into the privileged helper over its Unix-domain-socket protocol.
/// The transport itself lives in `hearth-helper`'s client side; this trait
/// is the seam the executor depends on, so it can be exercised with a mock.
pub trait HelperClient: Send + Sync {
    /// Send one request and wait for its response.
    fn call(&self, request: HelperRequest) -> Result<HelperResponse>;
}

fn expect_success(resp: HelperResponse) -> Result<HelperResponse> {
    if resp.success {
        Ok(resp)
    } else {
        Err(Error::CommandFailed(resp.error.unwrap_or_else(|| "helper call failed".into())))
    }
}

/// Agent-side command executor: the contract exposed to the agent session.
pub struct Executor<H: HelperClient> {
    app_dir_root: PathBuf,
    data_dir_root: PathBuf,
    config_dir_root: PathBuf,
    sandbox: PathSandbox,
    helper: H,
    /// When true, `systemctl` falls back to `start.sh`/`stop.sh` scripts
    /// instead of routing through the helper.
    dev_mode: bool,
    followers: std::sync::Mutex<LogFollower>,
}

impl<H: HelperClient> Executor<H> {
    /// Build an executor rooted at the standard `/opt`, `/var/lib`, `/etc`
    /// locations for `product`.
    pub fn new(product: &str, helper: H, dev_mode: bool) -> Self {
        Self {
            app_dir_root: PathBuf::from(format!("/opt/{product}")),
            data_dir_root: PathBuf::from(format!("/var/lib/{product}")),
            config_dir_root: PathBuf::from(format!("/etc/{product}")),
            sandbox: PathSandbox::for_product(product),
            helper,
            dev_mode,
            followers: std::sync::Mutex::new(LogFollower::new()),
        }
    }

    fn app_dir(&self, app_name: &str) -> PathBuf {
        self.app_dir_root.join(app_name)
    }

    fn data_dir(&self, app_name: &str) -> PathBuf {
        self.data_dir_root.join(app_name)
    }

    fn config_dir(&self, app_name: &str) -> PathBuf {
        self.config_dir_root.join(app_name)
    }

    fn write_config_files(&self, app_name: &str, files: &[ConfigFile]) -> Result<()> {
        for file in files {
            let dest = self.app_dir(app_name).join(&file.path);
            let validated = self.sandbox.validate(&dest)?;
            if self.sandbox.requires_helper(&validated) {
                self.helper.call(HelperRequest::WriteFile {
                    path: validated.display().to_string(),
                    contents: file.contents.clone(),
                    mode: Some("0640".into()),
                })
                .and_then(expect_success)?;
            } else {
                if let Some(parent) = validated.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&validated, &file.contents)?;
            }
        }
        Ok(())
    }

    async fn run_script(
        &self,
        app_name: &str,
        script_name: &str,
        contents: &str,
        extra_env: &BTreeMap<String, String>,
        service_user: Option<&str>,
        service_group: Option<&str>,
    ) -> Result<()> {
        let app_dir = self.app_dir(app_name);
        let script_path = self.sandbox.validate(app_dir.join(script_name))?;
        fs::write(&script_path, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_path, fs::Permissions::from_mode(0o750))?;
        }

        let ctx = AppEnvContext {
            app_name: app_name.to_string(),
            app_version: extra_env.get("APP_VERSION").cloned().unwrap_or_default(),
            app_dir: app_dir.display().to_string(),
            service_user: service_user.map(str::to_string),
            service_group: service_group.map(str::to_string),
            data_dir: self.data_dir(app_name).display().to_string(),
            config_dir: self.config_dir(app_name).display().to_string(),
        };
        let env = build_script_env(&ctx, extra_env);

        let mut command = AsyncCommand::new(&script_path);
        command.env_clear();
        for (key, value) in &env {
            command.env(key, value);
        }
        let status = command.status().await.map_err(Error::Io)?;
        if !status.success() {
            return Err(Error::CommandFailed(format!("{script_name} exited with {:?}", status.code())));
        }
        Ok(())
    }

    /// `install(appName, payload)`.
    pub async fn install(&self, app_name: &str, payload: &InstallPayload) -> Result<()> {
        let app_dir = self.sandbox.validate(self.app_dir(app_name))?;
        fs::create_dir_all(&app_dir)?;

        if let Some(user) = &payload.service_user {
            self.helper
                .call(HelperRequest::CreateServiceUser { username: user.clone(), home: None })
                .and_then(expect_success)?;
        }

        for relative in &payload.data_directories {
            let full = self.data_dir(app_name).join(relative);
            let owner = payload.service_user.as_ref().map(|u| {
                let group = payload.service_group.as_deref().unwrap_or(u);
                format!("{u}:{group}")
            });
            self.helper
                .call(HelperRequest::CreateDirectory {
                    path: full.display().to_string(),
                    owner,
                    mode: Some("0750".into()),
                })
                .and_then(expect_success)?;
        }

        self.write_config_files(app_name, &payload.config_files)?;

        if let Some(script) = &payload.install_script {
            self.run_script(
                app_name,
                "install.sh",
                script,
                &payload.env,
                payload.service_user.as_deref(),
                payload.service_group.as_deref(),
            )
            .await?;
        }

        if let Some(target) = &payload.capability_target {
            for capability in &payload.capabilities {
                self.helper
                    .call(HelperRequest::SetCapability { path: target.clone(), capability: capability.clone() })
                    .and_then(expect_success)?;
            }
        }

        if let Some(unit) = &payload.unit_file {
            let unit_path = format!("/etc/systemd/system/{app_name}.service");
            self.helper
                .call(HelperRequest::WriteFile { path: unit_path, contents: unit.clone(), mode: Some("0644".into()) })
                .and_then(expect_success)?;
            self.helper
                .call(HelperRequest::RegisterService { service: app_name.to_string() })
                .and_then(expect_success)?;
        }

        Ok(())
    }

    /// `configure(appName, files)`.
    pub async fn configure(&self, app_name: &str, payload: &ConfigurePayload) -> Result<()> {
        self.write_config_files(app_name, &payload.config_files)?;
        if let Some(script) = &payload.configure_script {
            self.run_script(app_name, "configure.sh", script, &payload.env, None, None).await?;
        }
        Ok(())
    }

    /// `systemctl(action, service)`: helper-routed in
    /// production, with a dev-mode fallback to `start.sh`/`stop.sh`.
    pub async fn systemctl(&self, action: &str, service: &str) -> Result<()> {
        if self.dev_mode {
            let script = match action {
                "start" => "start.sh",
                "stop" | "restart" => "stop.sh",
                other => return Err(Error::CommandFailed(format!("unsupported dev-mode action {other}"))),
            };
            let app_dir = self.app_dir(service);
            let script_path = self.sandbox.validate(app_dir.join(script))?;
            if script_path.exists() {
                let status = AsyncCommand::new(&script_path).status().await.map_err(Error::Io)?;
                if !status.success() {
                    return Err(Error::CommandFailed(format!("{script} exited with {:?}", status.code())));
                }
                return Ok(());
            }
        }
        self.helper
            .call(HelperRequest::Systemctl { subcommand: action.to_string(), service: service.to_string() })
            .and_then(expect_success)
            .map(|_| ())
    }

    /// `configureKeepalived`: writes the unit's
    /// keepalived config under the system config tree and restarts it
    /// through the helper, the same write/systemctl path `install` uses for
    /// any other system-routed file.
    pub async fn configure_keepalived(&self, config: &str) -> Result<()> {
        let path = "/etc/keepalived/keepalived.conf".to_string();
        self.helper
            .call(HelperRequest::WriteFile { path, contents: config.to_string(), mode: Some("0644".into()) })
            .and_then(expect_success)?;
        self.systemctl("restart", "keepalived").await
    }

    /// `checkKeepalived`: reports whether the keepalived unit is active.
    pub async fn check_keepalived(&self) -> Result<bool> {
        let output = AsyncCommand::new("systemctl")
            .arg("is-active")
            .arg("keepalived")
            .output()
            .await
            .map_err(Error::Io)?;
        Ok(output.status.success())
    }

    /// `uninstall(appName)`.
    pub async fn uninstall(&self, app_name: &str, uninstall_script: Option<&str>) -> Result<()> {
        self.systemctl("stop", app_name).await.ok();
        self.systemctl("disable", app_name).await.ok();

        if let Some(script) = uninstall_script {
            self.run_script(app_name, "uninstall.sh", script, &BTreeMap::new(), None, None).await.ok();
        }

        self.helper
            .call(HelperRequest::UnregisterService { service: app_name.to_string() })
            .and_then(expect_success)
            .ok();

        let app_dir = self.sandbox.validate(self.app_dir(app_name))?;
        if app_dir.exists() {
            fs::remove_dir_all(&app_dir)?;
        }
        Ok(())
    }

    /// `getLogs(appName, options)`.
    pub async fn get_logs(&self, sources: &LogSources, lines: usize) -> Result<Vec<String>> {
        LogTail::fetch(sources, lines).await
    }

    /// `startLogStream`: at most one active stream per
    /// `stream_id`.
    pub async fn start_log_stream(
        &self,
        stream_id: Uuid,
        sources: &LogSources,
        on_line: impl FnMut(String) + Send + 'static,
    ) -> Result<LogFollowHandle> {
        let mut followers = self.followers.lock().expect("followers lock poisoned");
        followers.start(stream_id, sources, on_line).await
    }

    /// `stopLogStream`: terminates the follower and frees the
    /// stream id for reuse.
    pub async fn stop_log_stream(&self, stream_id: Uuid, handle: LogFollowHandle) -> Result<()> {
        handle.stop().await?;
        self.followers.lock().expect("followers lock poisoned").forget(stream_id);
        Ok(())
    }

    /// `mountStorage`: delegates to the helper.
    pub async fn mount_storage(&self, options: MountOptions) -> Result<()> {
        self.helper.call(HelperRequest::Mount { options }).and_then(expect_success).map(|_| ())
    }

    /// `unmountStorage`: delegates to the helper.
    pub async fn unmount_storage(&self, mount_point: &str) -> Result<()> {
        self.helper
            .call(HelperRequest::Umount { mount_point: mount_point.to_string() })
            .and_then(expect_success)
            .map(|_| ())
    }

    /// `checkMount`: parses `findmnt`/`df` output for usage.
    pub async fn check_mount(&self, mount_point: &str) -> Result<MountInfo> {
        let output = AsyncCommand::new("findmnt")
            .arg("--json")
            .arg(mount_point)
            .output()
            .await
            .map_err(Error::Io)?;
        let mounted = output.status.success();
        let usage = if mounted { Self::disk_usage(mount_point).await.ok() } else { None };
        Ok(MountInfo { mounted, usage })
    }

    async fn disk_usage(mount_point: &str) -> Result<DiskUsage> {
        let output = AsyncCommand::new("df")
            .arg("--output=used,size")
            .arg("--block-size=1")
            .arg(mount_point)
            .output()
            .await
            .map_err(Error::Io)?;
        let text = String::from_utf8_lossy(&output.stdout);
        let data_line = text.lines().nth(1).ok_or_else(|| Error::CommandFailed("unexpected df output".into()))?;
        let mut fields = data_line.split_whitespace();
        let used: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::CommandFailed("unparsable df used".into()))?;
        let total: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::CommandFailed("unparsable df total".into()))?;
        Ok(DiskUsage { used_bytes: used, total_bytes: total })
    }
}

/// Result of `checkMount`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountInfo {
    /// Whether the mount point is currently mounted.
    pub mounted: bool,
    /// Disk usage, when mounted and `df` succeeded.
    pub usage: Option<DiskUsage>,
}

/// Disk usage for a mount point, in bytes.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    /// Bytes used.
    pub used_bytes: u64,
    /// Total capacity, bytes.
    pub total_bytes: u64,
}

/// Times a command execution and wraps the outcome into a duration, for
/// callers building a `CommandResult`.
pub async fn timed<T>(f: impl std::future::Future<Output = Result<T>>) -> (Result<T>, u64) {
    let started = Instant::now();
    let result = f.await;
    (result, started.elapsed().as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockHelper {
        calls: Mutex<Vec<HelperRequest>>,
        fail_next: bool,
    }

    impl MockHelper {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()), fail_next: false }
        }
    }

    impl HelperClient for MockHelper {
        fn call(&self, request: HelperRequest) -> Result<HelperResponse> {
            self.calls.lock().unwrap().push(request);
            if self.fail_next {
                Ok(HelperResponse::validation_failed("denied"))
            } else {
                Ok(HelperResponse::ok())
            }
        }
    }

    fn test_executor() -> Executor<MockHelper> {
        Executor::new("hearth-test", MockHelper::new(), true)
    }

    #[test]
    fn expect_success_maps_failure_to_command_failed() {
        let resp = HelperResponse::validation_failed("nope");
        let err = expect_success(resp).unwrap_err();
        assert_eq!(err.kind(), hearth_proto::ErrorKind::CommandFailed);
    }

    #[smol_potat::test]
    async fn configure_with_no_files_and_no_script_is_a_no_op() {
        let executor = test_executor();
        let payload = ConfigurePayload::default();
        assert!(executor.configure("demo", &payload).await.is_ok());
    }

    #[smol_potat::test]
    async fn check_mount_reports_unmounted_when_findmnt_fails() {
        let executor = test_executor();
        let info = executor.check_mount("/mnt/definitely-not-mounted-xyz").await.unwrap();
        assert!(!info.mounted);
        assert!(info.usage.is_none());
    }
}
