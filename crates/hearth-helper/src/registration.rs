//! Service-registration gate: `systemctl` on a
//! non-system unit is rejected unless the service name was previously
//! recorded by `register_service`.

use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// The set of systemd units the helper manages directly, regardless of
/// registration (e.g. the proxy itself, if it runs as a system unit).
const SYSTEM_SERVICES: &[&str] = &["hearth-orchestrator", "hearth-agent", "hearth-proxy-admin"];

/// Tracks which app-owned service names may be `systemctl`'d, via marker
/// files in a well-known directory.
pub struct ServiceRegistrationGate {
    registry_dir: PathBuf,
}

impl ServiceRegistrationGate {
    /// Build a gate backed by marker files under `registry_dir`.
    pub fn new(registry_dir: impl Into<PathBuf>) -> Self {
        Self { registry_dir: registry_dir.into() }
    }

    /// Record that `service` may subsequently be `systemctl`'d.
    pub fn register(&self, service: &str) -> Result<()> {
        fs::create_dir_all(&self.registry_dir)?;
        let marker = self.registry_dir.join(service);
        fs::write(&marker, b"")?;
        Ok(())
    }

    /// Remove a prior registration.
    pub fn unregister(&self, service: &str) -> Result<()> {
        let marker = self.registry_dir.join(service);
        if marker.exists() {
            fs::remove_file(&marker)?;
        }
        Ok(())
    }

    /// Whether `systemctl` may target `service`: either it's one of the
    /// fixed system services, or it has a regular, non-symlink marker file.
    pub fn allows(&self, service: &str) -> bool {
        if SYSTEM_SERVICES.contains(&service) {
            return true;
        }
        let marker = self.registry_dir.join(service);
        match fs::symlink_metadata(&marker) {
            Ok(meta) => meta.is_file() && !meta.file_type().is_symlink(),
            Err(_) => false,
        }
    }

    /// Gate a `systemctl` request, returning a [`Error::Validation`] if the
    /// service isn't registered.
    pub fn check(&self, service: &str) -> Result<()> {
        if self.allows(service) {
            Ok(())
        } else {
            Err(Error::Validation(format!("service not registered: {service}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_services_are_always_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ServiceRegistrationGate::new(dir.path());
        assert!(gate.check("hearth-orchestrator").is_ok());
    }

    #[test]
    fn unregistered_app_services_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ServiceRegistrationGate::new(dir.path());
        assert!(gate.check("demo-app").is_err());
    }

    #[test]
    fn register_then_unregister_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ServiceRegistrationGate::new(dir.path());
        gate.register("demo-app").unwrap();
        assert!(gate.check("demo-app").is_ok());
        gate.unregister("demo-app").unwrap();
        assert!(gate.check("demo-app").is_err());
    }

    #[test]
    #[cfg(unix)]
    fn symlinked_marker_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::NamedTempFile::new().unwrap();
        let gate = ServiceRegistrationGate::new(dir.path());
        fs::create_dir_all(dir.path()).unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), dir.path().join("demo-app")).unwrap();
        assert!(!gate.allows("demo-app"));
    }
}
