//! CIFS credential handling: written to a restrictive
//! tempfile and removed on every exit path, never passed as a process
//! argument.

use std::io::Write;
use std::path::{Path, PathBuf};

use hearth_proto::helper::MountCredentials;

use crate::error::{Error, Result};

/// A tempfile holding `username=...\npassword=...\n`, in the format
/// `mount.cifs`'s `credentials=` option expects. Removed when dropped,
/// regardless of how the caller's scope exits.
pub struct CredentialsFile {
    path: PathBuf,
}

impl CredentialsFile {
    /// Write `creds` to a new tempfile with `0600` permissions.
    pub fn write(creds: &MountCredentials) -> Result<Self> {
        let mut file = tempfile::NamedTempFile::new().map_err(Error::Io)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(Error::Io)?;
        }
        writeln!(file, "username={}", creds.username).map_err(Error::Io)?;
        writeln!(file, "password={}", creds.password).map_err(Error::Io)?;
        file.flush().map_err(Error::Io)?;
        let (_, path) = file.keep().map_err(|e| Error::Io(e.error))?;
        Ok(Self { path })
    }

    /// Path to the credentials file, suitable for `credentials=<path>`.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CredentialsFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_cleans_up_credentials_file() {
        let creds = MountCredentials { username: "svc".into(), password: "hunter2".into() };
        let path;
        {
            let file = CredentialsFile::write(&creds).unwrap();
            path = file.path().to_path_buf();
            let contents = std::fs::read_to_string(file.path()).unwrap();
            assert!(contents.contains("username=svc"));
            assert!(contents.contains("password=hunter2"));
        }
        assert!(!path.exists());
    }
}
