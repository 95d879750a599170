//! App manifest loading from the fleet's manifest directory. App-store
//! ingestion (GitHub/Umbrel/CasaOS/Start9 parsers) is out of scope; this is
//! the minimal loader that makes installed manifests available to the
//! deployer and bootstrap loop without it, reading each manifest off disk
//! at startup instead of holding a fixed in-memory list.

use std::path::{Path, PathBuf};

use hearth_deployer::ManifestProvider;
use hearth_proto::Manifest;
use tracing::warn;

/// Loads every `*.yaml`/`*.yml` file directly under a directory as a
/// [`Manifest`], reloading the set is not supported — a changed manifest
/// directory requires a restart.
pub struct FsManifestProvider {
    manifests: Vec<Manifest>,
}

impl FsManifestProvider {
    /// Read every manifest file in `dir`. A directory that doesn't exist
    /// yet yields an empty provider rather than an error, so a fresh
    /// installation can come up before any app manifests are dropped in.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let mut manifests = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self { manifests }),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path: PathBuf = entry?.path();
            let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
            if !path.is_file() || !is_yaml {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            match serde_yaml::from_str::<Manifest>(&text) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unparsable manifest"),
            }
        }

        Ok(Self { manifests })
    }
}

impl ManifestProvider for FsManifestProvider {
    fn get(&self, name: &str) -> Option<Manifest> {
        self.manifests.iter().find(|m| m.name == name).cloned()
    }

    fn all(&self) -> Vec<Manifest> {
        self.manifests.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_yields_an_empty_provider() {
        let provider = FsManifestProvider::load(Path::new("/nonexistent/hearth-manifests")).unwrap();
        assert!(provider.all().is_empty());
    }

    #[test]
    fn loads_yaml_manifests_and_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("demo.yaml"),
            "name: demo\ndisplay_name: Demo\nversion: \"1.0\"\ncategory: utility\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a manifest").unwrap();

        let provider = FsManifestProvider::load(dir.path()).unwrap();
        assert_eq!(provider.all().len(), 1);
        assert_eq!(provider.get("demo").unwrap().display_name, "Demo");
        assert!(provider.get("missing").is_none());
    }
}
