//! Wire shapes for the privileged-helper Unix-domain-socket protocol.
//!
//! Line-delimited JSON: one request per line, exactly one response per
//! request. The helper never executes an action outside this closed set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A request to the privileged helper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HelperRequest {
    /// Create a system user dedicated to running one app's service.
    CreateServiceUser {
        /// Username to create.
        username: String,
        /// Optional home directory.
        #[serde(default)]
        home: Option<String>,
    },
    /// Create a directory (and parents) with the given owner/mode.
    CreateDirectory {
        /// Absolute path to create.
        path: String,
        /// `user[:group]` owner string.
        #[serde(default)]
        owner: Option<String>,
        /// Octal mode string, e.g. `"0750"`.
        #[serde(default)]
        mode: Option<String>,
    },
    /// chown a path.
    SetOwnership {
        /// Absolute path.
        path: String,
        /// `user[:group]` owner string.
        owner: String,
    },
    /// chmod a path.
    SetPermissions {
        /// Absolute path.
        path: String,
        /// Octal mode string, e.g. `"0640"`.
        mode: String,
    },
    /// Write file contents at an allow-listed path.
    WriteFile {
        /// Absolute destination path.
        path: String,
        /// File contents.
        contents: String,
        /// Octal mode string for the created file.
        #[serde(default)]
        mode: Option<String>,
    },
    /// Copy a file between two allow-listed paths.
    CopyFile {
        /// Absolute source path.
        source: String,
        /// Absolute destination path.
        destination: String,
    },
    /// Drive `systemctl` against a registered service unit.
    Systemctl {
        /// `start | stop | restart | enable | disable | status`.
        subcommand: String,
        /// Unit name, without the `.service` suffix.
        service: String,
    },
    /// Apply a Linux capability to a binary, e.g. `cap_net_bind_service=+ep`.
    SetCapability {
        /// Absolute path to the binary.
        path: String,
        /// Capability string.
        capability: String,
    },
    /// Run a whitelisted command as a specific service user.
    RunAsUser {
        /// User to run as.
        user: String,
        /// Absolute path of a pre-approved command.
        command: String,
        /// Arguments, each validated against a safe-character class.
        #[serde(default)]
        args: Vec<String>,
    },
    /// Mount a filesystem.
    Mount {
        /// Structured mount description, serialized to `-o` only by the helper.
        options: MountOptions,
    },
    /// Unmount a previously mounted path.
    Umount {
        /// Mount point to unmount.
        mount_point: String,
    },
    /// Install a package via the system package manager.
    AptInstall {
        /// Package name; validated against a name pattern.
        package: String,
    },
    /// Record that a service name may subsequently be `systemctl`'d.
    RegisterService {
        /// Service name to register.
        service: String,
    },
    /// Remove a prior service registration.
    UnregisterService {
        /// Service name to unregister.
        service: String,
    },
}

/// A structured mount request. Only the helper serializes this into the
/// `-o` option string, and only after allow-list checks on every field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MountOptions {
    /// Filesystem type, e.g. `"nfs"`, `"cifs"`.
    #[serde(rename = "type")]
    pub fs_type: String,
    /// Source spec, e.g. `host:/path` (NFS) or `//host/share` (CIFS).
    pub source: String,
    /// Target mount point; must fall under an allow-listed prefix.
    pub mount_point: String,
    /// Individual mount options, each validated independently.
    #[serde(default)]
    pub option_set: Vec<String>,
    /// CIFS credentials, written to a restrictive tempfile, never passed as argv.
    #[serde(default)]
    pub credentials: Option<MountCredentials>,
}

/// Credentials for a CIFS mount.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct MountCredentials {
    /// CIFS username.
    pub username: String,
    /// CIFS password. Never logged, never passed as a process argument.
    pub password: String,
}

impl std::fmt::Debug for MountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The helper's response to any [`HelperRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HelperResponse {
    /// Whether the request succeeded.
    pub success: bool,
    /// Captured stdout on success, when meaningful (e.g. `findmnt` output).
    #[serde(default)]
    pub output: Option<String>,
    /// Error detail on failure. Validation failures are prefixed
    /// `"Validation failed: "`.
    #[serde(default)]
    pub error: Option<String>,
}

impl HelperResponse {
    /// A bare success response.
    pub fn ok() -> Self {
        Self {
            success: true,
            output: None,
            error: None,
        }
    }

    /// A success response carrying captured output.
    pub fn ok_with_output(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    /// A validation rejection, prefixed per the wire convention.
    pub fn validation_failed(reason: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(format!("Validation failed: {reason}")),
        }
    }

    /// An execution failure, carrying the underlying error/stderr.
    pub fn execution_failed(reason: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(reason.to_string()),
        }
    }
}

/// Structured, non-sensitive fields logged for every helper request.
#[derive(Debug, Clone, Serialize)]
pub struct HelperLogEntry {
    /// The action name, e.g. `"write_file"`.
    pub action: String,
    /// Non-sensitive identifying fields (paths, service names — never secrets).
    pub fields: HashMap<String, String>,
    /// Whether the request was accepted by all allow-list layers.
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tags_by_action() {
        let req = HelperRequest::Systemctl {
            subcommand: "start".into(),
            service: "demo".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["action"], "systemctl");
        assert_eq!(json["service"], "demo");
    }

    #[test]
    fn validation_failed_prefixes_message() {
        let resp = HelperResponse::validation_failed("Write path not allowed");
        assert_eq!(
            resp.error.as_deref(),
            Some("Validation failed: Write path not allowed")
        );
        assert!(!resp.success);
    }

    #[test]
    fn mount_credentials_debug_redacts_password() {
        let creds = MountCredentials {
            username: "svc".into(),
            password: "hunter2".into(),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
