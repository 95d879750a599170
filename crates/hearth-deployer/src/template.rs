//! Config and lifecycle-script rendering.
//!
//! A manifest names values, not files; the actual file/script bodies come
//! from a per-app template directory rendered with `handlebars`. Injected as
//! a trait so tests and the bootstrap loop can supply an in-memory source
//! without touching disk, the same seam `hearth_agent::dispatch` uses for
//! `LogSourceProvider`.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use handlebars::Handlebars;
use hearth_executor::ConfigFile;
use hearth_proto::Manifest;

use crate::error::{Error, Result};

/// Which lifecycle script to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// `install.sh`.
    Install,
    /// `configure.sh`.
    Configure,
    /// `uninstall.sh`.
    Uninstall,
}

impl ScriptKind {
    fn template_name(self) -> &'static str {
        match self {
            ScriptKind::Install => "install.sh.hbs",
            ScriptKind::Configure => "configure.sh.hbs",
            ScriptKind::Uninstall => "uninstall.sh.hbs",
        }
    }
}

/// Renders a manifest's config files and lifecycle scripts from templates.
pub trait TemplateSource: Send + Sync {
    /// Render every config file template declared for `manifest`.
    fn render_config_files(&self, manifest: &Manifest, values: &HashMap<String, serde_json::Value>) -> Result<Vec<ConfigFile>>;

    /// Render one lifecycle script, or `None` if the app has no template for it.
    fn render_script(
        &self,
        manifest: &Manifest,
        kind: ScriptKind,
        values: &HashMap<String, serde_json::Value>,
    ) -> Result<Option<String>>;

    /// Render the systemd unit file, or `None` if the app isn't unit-managed.
    fn render_unit_file(&self, manifest: &Manifest, values: &HashMap<String, serde_json::Value>) -> Result<Option<String>>;
}

/// Loads `.hbs` templates from `<templates_root>/<app_name>/...` on disk.
///
/// Layout per app:
/// - `config/*.hbs` — one rendered file each, destination name is the
///   template's filename with the trailing `.hbs` stripped.
/// - `install.sh.hbs`, `configure.sh.hbs`, `uninstall.sh.hbs` — lifecycle scripts.
/// - `unit.service.hbs` — systemd unit, if the app runs as a service.
pub struct FsTemplateSource {
    templates_root: PathBuf,
}

impl FsTemplateSource {
    /// Point a new source at a directory of per-app template trees.
    pub fn new(templates_root: impl Into<PathBuf>) -> Self {
        Self { templates_root: templates_root.into() }
    }

    fn app_dir(&self, app_name: &str) -> PathBuf {
        self.templates_root.join(app_name)
    }

    fn render(&self, template: &str, values: &HashMap<String, serde_json::Value>) -> Result<String> {
        let hb = Handlebars::new();
        hb.render_template(template, values).map_err(|e| Error::Template(e.to_string()))
    }
}

impl TemplateSource for FsTemplateSource {
    fn render_config_files(&self, manifest: &Manifest, values: &HashMap<String, serde_json::Value>) -> Result<Vec<ConfigFile>> {
        let dir = self.app_dir(&manifest.name).join("config");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let mut entries: Vec<_> = fs::read_dir(&dir).map_err(|e| Error::Template(e.to_string()))?.collect();
        entries.sort_by_key(|e| e.as_ref().map(|e| e.path()).unwrap_or_default());
        for entry in entries {
            let entry = entry.map_err(|e| Error::Template(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("hbs") {
                continue;
            }
            let template = fs::read_to_string(&path).map_err(|e| Error::Template(e.to_string()))?;
            let rendered = self.render(&template, values)?;
            let dest_name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .ok_or_else(|| Error::Template(format!("unreadable template filename: {}", path.display())))?;
            files.push(ConfigFile { path: dest_name, contents: rendered });
        }
        Ok(files)
    }

    fn render_script(
        &self,
        manifest: &Manifest,
        kind: ScriptKind,
        values: &HashMap<String, serde_json::Value>,
    ) -> Result<Option<String>> {
        let path = self.app_dir(&manifest.name).join(kind.template_name());
        if !path.is_file() {
            return Ok(None);
        }
        let template = fs::read_to_string(&path).map_err(|e| Error::Template(e.to_string()))?;
        Ok(Some(self.render(&template, values)?))
    }

    fn render_unit_file(&self, manifest: &Manifest, values: &HashMap<String, serde_json::Value>) -> Result<Option<String>> {
        let path = self.app_dir(&manifest.name).join("unit.service.hbs");
        if !path.is_file() {
            return Ok(None);
        }
        let template = fs::read_to_string(&path).map_err(|e| Error::Template(e.to_string()))?;
        Ok(Some(self.render(&template, values)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_proto::WebUi;

    fn manifest() -> Manifest {
        Manifest {
            name: "demo".into(),
            display_name: "Demo".into(),
            version: "1.0".into(),
            category: "utility".into(),
            config_schema: vec![],
            provides: vec![],
            requires: vec![],
            conflicts: vec![],
            webui: None::<WebUi>,
            service_user: None,
            service_group: None,
            data_directories: vec![],
            capabilities: vec![],
            logging: None,
            system: false,
            mandatory: false,
            singleton: false,
        }
    }

    #[test]
    fn missing_app_directory_renders_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsTemplateSource::new(dir.path());
        let values = HashMap::new();
        assert!(source.render_config_files(&manifest(), &values).unwrap().is_empty());
        assert!(source.render_script(&manifest(), ScriptKind::Install, &values).unwrap().is_none());
        assert!(source.render_unit_file(&manifest(), &values).unwrap().is_none());
    }

    #[test]
    fn renders_config_file_and_install_script_substituting_values() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("demo");
        let config_dir = app_dir.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("demo.conf.hbs"), "rpc_password={{rpc_password}}\n").unwrap();
        fs::write(app_dir.join("install.sh.hbs"), "#!/bin/sh\necho installing {{name}}\n").unwrap();

        let source = FsTemplateSource::new(dir.path());
        let mut values = HashMap::new();
        values.insert("rpc_password".to_string(), serde_json::json!("s3cr3t"));
        values.insert("name".to_string(), serde_json::json!("demo"));

        let files = source.render_config_files(&manifest(), &values).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "demo.conf");
        assert_eq!(files[0].contents, "rpc_password=s3cr3t\n");

        let script = source.render_script(&manifest(), ScriptKind::Install, &values).unwrap().unwrap();
        assert_eq!(script, "#!/bin/sh\necho installing demo\n");
    }
}
