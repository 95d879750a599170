//! Path sandbox: bounds every file write, script run, and log path to a
//! configured set of prefixes.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A configured set of allowed path prefixes, plus a separate set of
/// "system" prefixes that must route through the privileged helper rather
/// than being written directly.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    allowed_prefixes: Vec<PathBuf>,
    system_prefixes: Vec<PathBuf>,
}

impl PathSandbox {
    /// Build the default sandbox for a product installed under `prefix`
    /// (e.g. `/opt/hearth`).2: `/opt/<product>/`,
    /// `/etc/<product>/`, `/var/lib/<product>/`, `/var/log/<product>/`.
    pub fn for_product(prefix: &str) -> Self {
        Self {
            allowed_prefixes: vec![
                PathBuf::from(format!("/opt/{prefix}")),
                PathBuf::from(format!("/etc/{prefix}")),
                PathBuf::from(format!("/var/lib/{prefix}")),
                PathBuf::from(format!("/var/log/{prefix}")),
            ],
            system_prefixes: vec![
                PathBuf::from("/etc"),
                PathBuf::from("/var/log"),
                PathBuf::from("/run"),
                PathBuf::from("/usr"),
                PathBuf::from("/lib/systemd"),
            ],
        }
    }

    /// Add an extra allowed prefix (e.g. an app-specific config dir the
    /// manifest declares).
    pub fn allow(&mut self, prefix: impl Into<PathBuf>) {
        self.allowed_prefixes.push(prefix.into());
    }

    /// Normalize and validate a path: reject `..` components outright, then
    /// require the normalized path to fall under one of the allowed
    /// prefixes.
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(Error::PathNotAllowed(path.display().to_string()));
        }
        if path.as_os_str().to_str().is_none_or(|s| s.contains('\0')) {
            return Err(Error::PathNotAllowed("path contains NUL byte".into()));
        }
        let normalized = normalize(path);
        if self
            .allowed_prefixes
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
        {
            Ok(normalized)
        } else {
            Err(Error::PathNotAllowed(normalized.display().to_string()))
        }
    }

    /// Whether a (validated) path must be written through the privileged
    /// helper rather than directly by the agent process.
    pub fn requires_helper(&self, path: impl AsRef<Path>) -> bool {
        let normalized = normalize(path.as_ref());
        self.system_prefixes.iter().any(|prefix| normalized.starts_with(prefix))
    }
}

/// Lexical normalization (no symlink resolution — the agent process does
/// not run as root and cannot be trusted to resolve symlinks safely; that
/// check belongs to the privileged helper, which does resolve them before
/// executing a `write_file`/`create_directory` request).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_paths_under_allowed_prefixes() {
        let sandbox = PathSandbox::for_product("hearth");
        assert!(sandbox.validate("/opt/hearth/apps/demo/.meta.json").is_ok());
    }

    #[test]
    fn rejects_paths_outside_the_sandbox() {
        let sandbox = PathSandbox::for_product("hearth");
        assert!(sandbox.validate("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let sandbox = PathSandbox::for_product("hearth");
        assert!(sandbox.validate("/opt/hearth/apps/../../etc/passwd").is_err());
    }

    #[test]
    fn system_paths_require_the_helper() {
        let sandbox = PathSandbox::for_product("hearth");
        assert!(sandbox.requires_helper("/etc/systemd/system/demo.service"));
        assert!(!sandbox.requires_helper("/opt/hearth/apps/demo/config.yaml"));
    }
}
