//! Request validation and execution: every
//! [`HelperRequest`] is validated against all five allow-list layers before
//! any command or filesystem mutation runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_process::Command;
use hearth_proto::helper::{HelperRequest, HelperResponse, MountOptions};
use tracing::info;

use crate::allowlist::{sanitize_argument, CommandAllowlist, PathAllowlist, ValuePatterns};
use crate::error::{Error, Result};
use crate::mount_creds::CredentialsFile;
use crate::registration::ServiceRegistrationGate;

/// Everything the handler needs to validate and execute requests.
pub struct HelperConfig {
    /// Path allow-lists for directory vs. write targets.
    pub paths: PathAllowlist,
    /// Compiled value allow-lists (usernames, modes, mount options, ...).
    pub values: ValuePatterns,
    /// Per-user whitelisted commands for `run_as_user`.
    pub commands: CommandAllowlist,
    /// Service-registration gate for `systemctl`.
    pub services: ServiceRegistrationGate,
}

impl HelperConfig {
    /// Build the default configuration for a product installed under `prefix`.
    pub fn for_product(prefix: &str, registry_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathAllowlist::for_product(prefix),
            values: ValuePatterns::default(),
            commands: CommandAllowlist::default(),
            services: ServiceRegistrationGate::new(registry_dir),
        }
    }
}

/// Validate and execute one request, logging its outcome as structured JSON
/// to stdout.
pub async fn handle(request: HelperRequest, config: &HelperConfig) -> HelperResponse {
    let action = action_name(&request);
    let fields = log_fields(&request);

    match execute(request, config).await {
        Ok(resp) => {
            info!(target: "hearth_helper", action, accepted = true, ?fields, "helper request handled");
            resp
        }
        Err(Error::Validation(reason)) => {
            info!(target: "hearth_helper", action, accepted = false, ?fields, reason = %reason, "helper request rejected");
            HelperResponse::validation_failed(reason)
        }
        Err(err) => {
            info!(target: "hearth_helper", action, accepted = true, ?fields, error = %err, "helper request failed");
            HelperResponse::execution_failed(err)
        }
    }
}

fn action_name(request: &HelperRequest) -> &'static str {
    match request {
        HelperRequest::CreateServiceUser { .. } => "create_service_user",
        HelperRequest::CreateDirectory { .. } => "create_directory",
        HelperRequest::SetOwnership { .. } => "set_ownership",
        HelperRequest::SetPermissions { .. } => "set_permissions",
        HelperRequest::WriteFile { .. } => "write_file",
        HelperRequest::CopyFile { .. } => "copy_file",
        HelperRequest::Systemctl { .. } => "systemctl",
        HelperRequest::SetCapability { .. } => "set_capability",
        HelperRequest::RunAsUser { .. } => "run_as_user",
        HelperRequest::Mount { .. } => "mount",
        HelperRequest::Umount { .. } => "umount",
        HelperRequest::AptInstall { .. } => "apt_install",
        HelperRequest::RegisterService { .. } => "register_service",
        HelperRequest::UnregisterService { .. } => "unregister_service",
    }
}

/// Non-sensitive identifying fields for the structured log line. Never
/// includes file contents or mount credentials.
fn log_fields(request: &HelperRequest) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    match request {
        HelperRequest::CreateServiceUser { username, .. } => {
            fields.insert("username".into(), username.clone());
        }
        HelperRequest::CreateDirectory { path, .. }
        | HelperRequest::SetOwnership { path, .. }
        | HelperRequest::SetPermissions { path, .. }
        | HelperRequest::WriteFile { path, .. }
        | HelperRequest::SetCapability { path, .. } => {
            fields.insert("path".into(), path.clone());
        }
        HelperRequest::CopyFile { source, destination } => {
            fields.insert("source".into(), source.clone());
            fields.insert("destination".into(), destination.clone());
        }
        HelperRequest::Systemctl { subcommand, service } => {
            fields.insert("subcommand".into(), subcommand.clone());
            fields.insert("service".into(), service.clone());
        }
        HelperRequest::RunAsUser { user, command, .. } => {
            fields.insert("user".into(), user.clone());
            fields.insert("command".into(), command.clone());
        }
        HelperRequest::Mount { options } => {
            fields.insert("mount_point".into(), options.mount_point.clone());
            fields.insert("fs_type".into(), options.fs_type.clone());
        }
        HelperRequest::Umount { mount_point } => {
            fields.insert("mount_point".into(), mount_point.clone());
        }
        HelperRequest::AptInstall { package } => {
            fields.insert("package".into(), package.clone());
        }
        HelperRequest::RegisterService { service } | HelperRequest::UnregisterService { service } => {
            fields.insert("service".into(), service.clone());
        }
    }
    fields
}

async fn run(mut command: Command) -> Result<String> {
    let output = command.output().await.map_err(Error::Io)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(Error::Execution(String::from_utf8_lossy(&output.stderr).into_owned()))
    }
}

async fn execute(request: HelperRequest, config: &HelperConfig) -> Result<HelperResponse> {
    match request {
        HelperRequest::CreateServiceUser { username, home } => {
            config.values.username(&username)?;
            let check = Command::new("id").arg("-u").arg(&username).output().await.map_err(Error::Io)?;
            if check.status.success() {
                return Ok(HelperResponse::ok());
            }
            let mut cmd = Command::new("useradd");
            cmd.args(["--system", "--shell", "/usr/sbin/nologin"]);
            if let Some(home) = &home {
                cmd.arg("--home").arg(home);
            }
            cmd.arg(&username);
            run(cmd).await.map(|_| HelperResponse::ok())
        }

        HelperRequest::CreateDirectory { path, owner, mode } => {
            let resolved = config.paths.validate_directory(&path)?;
            if let Some(owner) = &owner {
                config.values.owner(owner)?;
            }
            if let Some(mode) = &mode {
                config.values.octal_mode(mode)?;
            }
            std::fs::create_dir_all(&resolved).map_err(Error::Io)?;
            if let Some(owner) = &owner {
                run(chown_command(&resolved, owner)).await?;
            }
            if let Some(mode) = &mode {
                run(chmod_command(&resolved, mode)).await?;
            }
            Ok(HelperResponse::ok())
        }

        HelperRequest::SetOwnership { path, owner } => {
            let resolved = config.paths.validate_write_target(&path)?;
            config.values.owner(&owner)?;
            run(chown_command(&resolved, &owner)).await.map(|_| HelperResponse::ok())
        }

        HelperRequest::SetPermissions { path, mode } => {
            let resolved = config.paths.validate_write_target(&path)?;
            config.values.octal_mode(&mode)?;
            run(chmod_command(&resolved, &mode)).await.map(|_| HelperResponse::ok())
        }

        HelperRequest::WriteFile { path, contents, mode } => {
            let resolved = config.paths.validate_write_target(&path)?;
            if let Some(mode) = &mode {
                config.values.octal_mode(mode)?;
            }
            if let Some(parent) = resolved.parent() {
                std::fs::create_dir_all(parent).map_err(Error::Io)?;
            }
            std::fs::write(&resolved, contents).map_err(Error::Io)?;
            if let Some(mode) = &mode {
                run(chmod_command(&resolved, mode)).await?;
            }
            Ok(HelperResponse::ok())
        }

        HelperRequest::CopyFile { source, destination } => {
            let source = config.paths.validate_write_target(&source)?;
            let destination = config.paths.validate_write_target(&destination)?;
            std::fs::copy(&source, &destination).map_err(Error::Io)?;
            Ok(HelperResponse::ok())
        }

        HelperRequest::Systemctl { subcommand, service } => {
            config.values.service_name(&service)?;
            config.services.check(&service)?;
            let unit = format!("{service}.service");
            let output = run(Command::new("systemctl").arg(&subcommand).arg(&unit)).await?;
            Ok(HelperResponse::ok_with_output(output))
        }

        HelperRequest::SetCapability { path, capability } => {
            let resolved = config.paths.validate_write_target(&path)?;
            config.values.capability(&capability)?;
            run(Command::new("setcap").arg(&capability).arg(&resolved)).await.map(|_| HelperResponse::ok())
        }

        HelperRequest::RunAsUser { user, command, args } => {
            config.values.username(&user)?;
            let command_path = Path::new(&command);
            config.commands.validate(&user, command_path)?;
            for arg in &args {
                sanitize_argument(arg)?;
            }
            let mut cmd = Command::new("runuser");
            cmd.arg("-u").arg(&user).arg("--").arg(&command).args(&args);
            run(cmd).await.map(HelperResponse::ok_with_output)
        }

        HelperRequest::Mount { options } => execute_mount(options, config).await,

        HelperRequest::Umount { mount_point } => {
            config.values.mount_point(&mount_point)?;
            run(Command::new("umount").arg(&mount_point)).await.map(|_| HelperResponse::ok())
        }

        HelperRequest::AptInstall { package } => {
            config.values.package_name(&package)?;
            run(Command::new("apt-get").arg("install").arg("-y").arg(&package))
                .await
                .map(|_| HelperResponse::ok())
        }

        HelperRequest::RegisterService { service } => {
            config.values.service_name(&service)?;
            config.services.register(&service)?;
            Ok(HelperResponse::ok())
        }

        HelperRequest::UnregisterService { service } => {
            config.values.service_name(&service)?;
            config.services.unregister(&service)?;
            Ok(HelperResponse::ok())
        }
    }
}

async fn execute_mount(options: MountOptions, config: &HelperConfig) -> Result<HelperResponse> {
    config.values.mount_point(&options.mount_point)?;
    match options.fs_type.as_str() {
        "nfs" => config.values.nfs_source(&options.source)?,
        "cifs" => config.values.cifs_source(&options.source)?,
        other => return Err(Error::Validation(format!("unsupported filesystem type: {other}"))),
    }
    for option in &options.option_set {
        config.values.mount_option(option)?;
    }

    let _creds_guard;
    let mut option_strings = options.option_set.clone();
    if let Some(creds) = &options.credentials {
        let file = CredentialsFile::write(creds)?;
        option_strings.push(format!("credentials={}", file.path().display()));
        _creds_guard = Some(file);
    } else {
        _creds_guard = None;
    }

    let resolved_mount_point = config.paths.validate_directory(&options.mount_point)?;
    std::fs::create_dir_all(&resolved_mount_point).map_err(Error::Io)?;

    let mut cmd = Command::new("mount");
    cmd.arg("-t").arg(&options.fs_type);
    if !option_strings.is_empty() {
        cmd.arg("-o").arg(option_strings.join(","));
    }
    cmd.arg(&options.source).arg(&resolved_mount_point);
    run(cmd).await.map(|_| HelperResponse::ok())
}

fn chown_command(path: &Path, owner: &str) -> Command {
    let mut cmd = Command::new("chown");
    cmd.arg(owner).arg(path);
    cmd
}

fn chmod_command(path: &Path, mode: &str) -> Command {
    let mut cmd = Command::new("chmod");
    cmd.arg(mode).arg(path);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn rejects_systemctl_on_unregistered_service() {
        let dir = tempfile::tempdir().unwrap();
        let config = HelperConfig::for_product("hearth", dir.path());
        let resp = handle(
            HelperRequest::Systemctl { subcommand: "start".into(), service: "demo-app".into() },
            &config,
        )
        .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().starts_with("Validation failed"));
    }

    #[smol_potat::test]
    async fn allows_systemctl_after_registration() {
        let dir = tempfile::tempdir().unwrap();
        let config = HelperConfig::for_product("hearth", dir.path());
        config.services.register("demo-app").unwrap();
        let resp = handle(
            HelperRequest::Systemctl { subcommand: "status".into(), service: "demo-app".into() },
            &config,
        )
        .await;
        // The registration gate passes; whether systemctl itself succeeds
        // depends on the host, so only assert we got past validation.
        assert!(resp.error.as_deref() != Some("Validation failed: service not registered: demo-app"));
    }

    #[smol_potat::test]
    async fn rejects_write_file_outside_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let config = HelperConfig::for_product("hearth", dir.path());
        let resp = handle(
            HelperRequest::WriteFile {
                path: "/etc/passwd".into(),
                contents: "pwned".into(),
                mode: None,
            },
            &config,
        )
        .await;
        assert!(!resp.success);
    }

    #[smol_potat::test]
    async fn rejects_run_as_user_with_unsafe_argument() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HelperConfig::for_product("hearth", dir.path());
        config.commands.allow("demo-svc", "/usr/bin/demo-tool");
        let resp = handle(
            HelperRequest::RunAsUser {
                user: "demo-svc".into(),
                command: "/usr/bin/demo-tool".into(),
                args: vec!["; rm -rf /".into()],
            },
            &config,
        )
        .await;
        assert!(!resp.success);
    }
}
