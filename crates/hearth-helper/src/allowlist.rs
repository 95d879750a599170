//! Allow-list validation layers for the privileged helper.
//!
//! Every [`hearth_proto::HelperRequest`] passes through these checks before
//! any command or filesystem mutation happens. Rejection is always a plain
//! `Err`, never a partial side effect.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Error, Result};

/// Path allow-lists for directory targets vs. write targets, each checked
/// by prefix match after resolving the path (and its nearest existing
/// ancestor) through any symlinks.
#[derive(Debug, Clone)]
pub struct PathAllowlist {
    directory_prefixes: Vec<PathBuf>,
    write_prefixes: Vec<PathBuf>,
}

impl PathAllowlist {
    /// Build the allow-list for a product installed under `prefix`.
    pub fn for_product(prefix: &str) -> Self {
        Self {
            directory_prefixes: vec![
                PathBuf::from(format!("/opt/{prefix}")),
                PathBuf::from(format!("/etc/{prefix}")),
                PathBuf::from(format!("/var/lib/{prefix}")),
                PathBuf::from(format!("/var/log/{prefix}")),
                PathBuf::from("/mnt"),
            ],
            write_prefixes: vec![
                PathBuf::from(format!("/opt/{prefix}")),
                PathBuf::from(format!("/etc/{prefix}")),
                PathBuf::from(format!("/var/lib/{prefix}")),
                PathBuf::from("/etc/systemd/system"),
            ],
        }
    }

    /// Validate a path intended for `create_directory`/`mount`.
    pub fn validate_directory(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        self.validate_against(path.as_ref(), &self.directory_prefixes)
    }

    /// Validate a path intended for `write_file`/`copy_file`/`set_ownership`/
    /// `set_permissions`/`set_capability`.
    pub fn validate_write_target(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        self.validate_against(path.as_ref(), &self.write_prefixes)
    }

    fn validate_against(&self, path: &Path, prefixes: &[PathBuf]) -> Result<PathBuf> {
        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(Error::Validation(format!("path traversal rejected: {}", path.display())));
        }
        if path.as_os_str().to_str().is_none_or(|s| s.contains('\0')) {
            return Err(Error::Validation("path contains NUL byte".into()));
        }
        if !path.is_absolute() {
            return Err(Error::Validation(format!("path must be absolute: {}", path.display())));
        }

        let resolved = resolve_real_path(path)?;
        if prefixes.iter().any(|prefix| resolved.starts_with(prefix)) {
            Ok(resolved)
        } else {
            Err(Error::Validation(format!("path not allow-listed: {}", resolved.display())))
        }
    }
}

/// Resolve `path` to its real location: if it exists, canonicalize it
/// directly (following symlinks); otherwise canonicalize the nearest
/// existing ancestor and re-append the remaining components, so a symlinked
/// parent directory cannot be used to escape the allow-list for a file that
/// doesn't exist yet.
fn resolve_real_path(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return std::fs::canonicalize(path).map_err(Error::Io);
    }
    let mut remaining = Vec::new();
    let mut ancestor = path;
    loop {
        match ancestor.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                if parent.exists() {
                    let real_parent = std::fs::canonicalize(parent).map_err(Error::Io)?;
                    let mut out = real_parent;
                    for component in remaining.into_iter().rev() {
                        out.push(component);
                    }
                    if let Some(name) = ancestor.file_name() {
                        out.push(name);
                    }
                    return Ok(out);
                }
                remaining.push(ancestor.file_name().unwrap_or_default().to_owned());
                ancestor = parent;
            }
            _ => return Ok(path.to_path_buf()),
        }
    }
}

/// Compiled regex allow-lists for the string-valued fields in a
/// [`hearth_proto::HelperRequest`].
pub struct ValuePatterns {
    username: Regex,
    owner: Regex,
    octal_mode: Regex,
    service_name: Regex,
    nfs_source: Regex,
    cifs_source: Regex,
    capability: Regex,
    mount_options: Vec<Regex>,
    package_name: Regex,
}

impl Default for ValuePatterns {
    fn default() -> Self {
        Self {
            username: Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").unwrap(),
            owner: Regex::new(r"^[a-z_][a-z0-9_-]{0,31}(:[a-z_][a-z0-9_-]{0,31})?$").unwrap(),
            octal_mode: Regex::new(r"^0[0-7]{3,4}$").unwrap(),
            service_name: Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap(),
            nfs_source: Regex::new(r"^[A-Za-z0-9_.-]+:/[^\0]*$").unwrap(),
            cifs_source: Regex::new(r"^//[A-Za-z0-9_.-]+/[^/\0]+$").unwrap(),
            capability: Regex::new(r"^cap_[a-z_]+=[+-]?[eip]+$").unwrap(),
            mount_options: vec![
                Regex::new(r"^(ro|rw|noatime|relatime|nodev|nosuid|noexec|_netdev|soft|hard)$").unwrap(),
                Regex::new(r"^uid=[0-9]+$").unwrap(),
                Regex::new(r"^gid=[0-9]+$").unwrap(),
                Regex::new(r"^rsize=[0-9]+$").unwrap(),
                Regex::new(r"^wsize=[0-9]+$").unwrap(),
                Regex::new(r"^file_mode=0[0-7]{3,4}$").unwrap(),
                Regex::new(r"^dir_mode=0[0-7]{3,4}$").unwrap(),
            ],
            package_name: Regex::new(r"^[a-z0-9][a-z0-9+.-]*$").unwrap(),
        }
    }
}

impl ValuePatterns {
    /// Validate a Unix username for `create_service_user`/`run_as_user`.
    pub fn username(&self, value: &str) -> Result<()> {
        self.check(&self.username, value, "username")
    }

    /// Validate a `user[:group]` owner string.
    pub fn owner(&self, value: &str) -> Result<()> {
        self.check(&self.owner, value, "owner")
    }

    /// Validate an octal mode string, e.g. `"0750"`.
    pub fn octal_mode(&self, value: &str) -> Result<()> {
        self.check(&self.octal_mode, value, "mode")
    }

    /// Validate a systemd service/unit name.
    pub fn service_name(&self, value: &str) -> Result<()> {
        self.check(&self.service_name, value, "service name")
    }

    /// Validate a mount point falls within `/mnt/` or a `.../mounts/` tree.
    pub fn mount_point(&self, value: &str) -> Result<()> {
        if value.starts_with("/mnt/") || value.contains("/mounts/") {
            Ok(())
        } else {
            Err(Error::Validation(format!("mount point not allow-listed: {value}")))
        }
    }

    /// Validate an NFS source spec, `host:/path`.
    pub fn nfs_source(&self, value: &str) -> Result<()> {
        self.check(&self.nfs_source, value, "NFS source")
    }

    /// Validate a CIFS source spec, `//host/share`.
    pub fn cifs_source(&self, value: &str) -> Result<()> {
        self.check(&self.cifs_source, value, "CIFS source")
    }

    /// Validate a single mount option against the enumerated/parameterized set.
    pub fn mount_option(&self, value: &str) -> Result<()> {
        if self.mount_options.iter().any(|re| re.is_match(value)) {
            Ok(())
        } else {
            Err(Error::Validation(format!("mount option not allow-listed: {value}")))
        }
    }

    /// Validate a Linux capability string, e.g. `cap_net_bind_service=+ep`.
    pub fn capability(&self, value: &str) -> Result<()> {
        self.check(&self.capability, value, "capability")
    }

    /// Validate a package name for `apt_install`.
    pub fn package_name(&self, value: &str) -> Result<()> {
        self.check(&self.package_name, value, "package name")
    }

    fn check(&self, pattern: &Regex, value: &str, field: &str) -> Result<()> {
        if pattern.is_match(value) {
            Ok(())
        } else {
            Err(Error::Validation(format!("{field} not allow-listed: {value}")))
        }
    }
}

/// Per-user whitelisted commands for `run_as_user`, keyed by username.
#[derive(Debug, Clone, Default)]
pub struct CommandAllowlist {
    by_user: std::collections::HashMap<String, Vec<PathBuf>>,
}

impl CommandAllowlist {
    /// Register `command` as runnable by `user`.
    pub fn allow(&mut self, user: impl Into<String>, command: impl Into<PathBuf>) {
        self.by_user.entry(user.into()).or_default().push(command.into());
    }

    /// Validate that `command` is pre-approved for `user`.
    pub fn validate(&self, user: &str, command: &Path) -> Result<()> {
        if !command.is_absolute() {
            return Err(Error::Validation(format!("command must be an absolute path: {}", command.display())));
        }
        match self.by_user.get(user) {
            Some(allowed) if allowed.iter().any(|c| c == command) => Ok(()),
            _ => Err(Error::Validation(format!("command not whitelisted for {user}: {}", command.display()))),
        }
    }
}

/// Safe-character class for `run_as_user` arguments: no newlines, NUL bytes,
/// or shell metacharacters.
pub fn sanitize_argument(arg: &str) -> Result<()> {
    let safe = arg.chars().all(|c| c.is_ascii_alphanumeric() || "_./:=,-@".contains(c));
    if safe && !arg.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(format!("argument contains unsafe characters: {arg}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn accepts_write_target_under_allowlisted_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let allowlist = PathAllowlist {
            directory_prefixes: vec![dir.path().to_path_buf()],
            write_prefixes: vec![dir.path().to_path_buf()],
        };
        let target = dir.path().join("app/config.yaml");
        assert!(allowlist.validate_write_target(&target).is_ok());
    }

    #[test]
    fn rejects_symlink_escaping_the_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let allowlist = PathAllowlist {
            directory_prefixes: vec![dir.path().to_path_buf()],
            write_prefixes: vec![dir.path().to_path_buf()],
        };

        let link = dir.path().join("escape");
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();
        #[cfg(unix)]
        {
            let target = link.join("payload.txt");
            assert!(allowlist.validate_write_target(&target).is_err());
        }
    }

    #[test]
    fn rejects_path_traversal_and_nul() {
        let allowlist = PathAllowlist::for_product("hearth");
        assert!(allowlist.validate_write_target("/opt/hearth/../etc/passwd").is_err());
    }

    #[test]
    fn value_patterns_accept_and_reject() {
        let patterns = ValuePatterns::default();
        assert!(patterns.username("demo-svc").is_ok());
        assert!(patterns.username("../etc").is_err());
        assert!(patterns.owner("demo-svc:demo-svc").is_ok());
        assert!(patterns.octal_mode("0750").is_ok());
        assert!(patterns.octal_mode("rwxr-xr-x").is_err());
        assert!(patterns.capability("cap_net_bind_service=+ep").is_ok());
        assert!(patterns.mount_point("/mnt/data").is_ok());
        assert!(patterns.mount_point("/etc/passwd").is_err());
        assert!(patterns.mount_option("uid=1000").is_ok());
        assert!(patterns.mount_option("exec").is_err());
        assert!(patterns.nfs_source("nas.local:/export/data").is_ok());
        assert!(patterns.cifs_source("//nas.local/share").is_ok());
    }

    #[test]
    fn command_allowlist_rejects_unregistered_commands() {
        let mut allowlist = CommandAllowlist::default();
        allowlist.allow("demo-svc", "/usr/bin/demo-tool");
        assert!(allowlist.validate("demo-svc", Path::new("/usr/bin/demo-tool")).is_ok());
        assert!(allowlist.validate("demo-svc", Path::new("/usr/bin/rm")).is_err());
    }

    #[test]
    fn sanitize_argument_rejects_shell_metacharacters() {
        assert!(sanitize_argument("--flag=value").is_ok());
        assert!(sanitize_argument("value; rm -rf /").is_err());
        assert!(sanitize_argument("$(whoami)").is_err());
    }

    #[test]
    fn resolve_real_path_handles_nonexistent_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("does-not-exist-yet.txt");
        let resolved = resolve_real_path(&target).unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
        let _ = fs::remove_dir_all(dir.path());
    }
}
