//! App manifest: the immutable registry entry describing an installable app.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable registry entry for an installable application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Unique app identifier, e.g. `"bitcoind"`.
    pub name: String,
    /// Human-facing name.
    pub display_name: String,
    /// Semver-ish version string.
    pub version: String,
    /// Grouping used by app-store listings.
    pub category: String,
    /// User-configurable fields.
    #[serde(default)]
    pub config_schema: Vec<ConfigField>,
    /// Services this app exposes to others.
    #[serde(default)]
    pub provides: Vec<ServiceDef>,
    /// Services this app requires from the fleet.
    #[serde(default)]
    pub requires: Vec<ServiceReq>,
    /// App names this app cannot coexist with on the same server.
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Web UI exposure, if any.
    #[serde(default)]
    pub webui: Option<WebUi>,
    /// Unix user the service runs as.
    #[serde(default)]
    pub service_user: Option<String>,
    /// Unix group the service runs as.
    #[serde(default)]
    pub service_group: Option<String>,
    /// Data directories the app owns, relative to its app directory.
    #[serde(default)]
    pub data_directories: Vec<String>,
    /// Linux capabilities the installed unit requires (e.g. `cap_net_bind_service=+ep`).
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Logging configuration hints passed through to the agent.
    #[serde(default)]
    pub logging: Option<LoggingSpec>,
    /// Whether this is a system/infrastructure app rather than user-facing.
    #[serde(default)]
    pub system: bool,
    /// Whether this app must always be present on the core server.
    #[serde(default)]
    pub mandatory: bool,
    /// Whether at most one deployment of this app may exist fleet-wide.
    #[serde(default)]
    pub singleton: bool,
}

/// Web UI exposure declared by a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebUi {
    /// Whether the UI route should be registered at all.
    pub enabled: bool,
    /// Path prefix the proxy strips before forwarding, e.g. `/demo`.
    pub base_path: String,
    /// Upstream port the UI listens on.
    pub port: u16,
}

/// Free-form logging hints; the agent decides how to apply them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingSpec {
    /// journald unit name to read, if different from the service name.
    #[serde(default)]
    pub journal_unit: Option<String>,
    /// Fallback log file paths to tail when journald has nothing.
    #[serde(default)]
    pub file_paths: Vec<String>,
}

/// A single user-configurable field in a manifest's config schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigField {
    /// Machine key, e.g. `"rpc_password"`.
    pub name: String,
    /// Human-facing label.
    pub label: String,
    /// Field type — governs validation and rendering.
    #[serde(rename = "type")]
    pub field_type: ConfigFieldType,
    /// Whether `userConfig` must supply this field when not `generated`.
    #[serde(default)]
    pub required: bool,
    /// Default value used by resolution and by the bootstrap loop.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Whitelist of acceptable values for `select` fields.
    #[serde(default)]
    pub options: Vec<String>,
    /// Whether the deployer fills this value itself (see secret generation).
    #[serde(default)]
    pub generated: bool,
    /// Whether the value must be treated as a secret (never logged).
    #[serde(default)]
    pub secret: bool,
    /// Name of another required service to inherit this value's default from.
    #[serde(default)]
    pub inherit_from: Option<String>,
}

/// The accepted types for a [`ConfigField`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFieldType {
    /// Plain string.
    String,
    /// Secret string; always implies `secret = true` semantics downstream.
    Password,
    /// Numeric value.
    Number,
    /// Boolean toggle.
    Boolean,
    /// One of `options`.
    Select,
}

/// A service an app makes available to the rest of the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDef {
    /// Service name, unique per deployment.
    pub name: String,
    /// Port the service listens on.
    pub port: u16,
    /// Transport protocol of the service.
    pub protocol: Protocol,
}

/// Transport protocol a [`ServiceDef`] or [`crate::route::ServiceRoute`] speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// HTTP(S), routed by path.
    Http,
    /// Raw TCP, routed by allocated port.
    Tcp,
}

/// A dependency an app declares on another service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceReq {
    /// Required service name.
    pub service: String,
    /// Whether a missing provider is a warning instead of an error.
    #[serde(default)]
    pub optional: bool,
    /// Locality constraint on the provider.
    #[serde(default)]
    pub locality: Option<Locality>,
}

/// Locality constraint for a [`ServiceReq`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Locality {
    /// The provider must run on the same server as the consumer.
    SameHost,
    /// Any provider in the fleet satisfies the requirement.
    Any,
}

impl Manifest {
    /// Find a declared config field by name.
    pub fn field(&self, name: &str) -> Option<&ConfigField> {
        self.config_schema.iter().find(|f| f.name == name)
    }

    /// All fields the deployer must fill with generated values.
    pub fn generated_secret_fields(&self) -> impl Iterator<Item = &ConfigField> {
        self.config_schema
            .iter()
            .filter(|f| f.generated && f.secret)
    }
}

/// Arbitrary user-supplied configuration values, keyed by [`ConfigField::name`].
pub type UserConfig = HashMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> Manifest {
        Manifest {
            name: "demo".into(),
            display_name: "Demo".into(),
            version: "1.0".into(),
            category: "utility".into(),
            config_schema: vec![ConfigField {
                name: "rpc_password".into(),
                label: "RPC password".into(),
                field_type: ConfigFieldType::Password,
                required: false,
                default: None,
                options: vec![],
                generated: true,
                secret: true,
                inherit_from: None,
            }],
            provides: vec![ServiceDef {
                name: "demo-rpc".into(),
                port: 8080,
                protocol: Protocol::Http,
            }],
            requires: vec![],
            conflicts: vec![],
            webui: Some(WebUi {
                enabled: true,
                base_path: "/demo".into(),
                port: 8080,
            }),
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
    fn generated_secret_fields_filters_correctly() {
        let m = sample_manifest();
        let fields: Vec<_> = m.generated_secret_fields().collect();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "rpc_password");
    }

    #[test]
    fn roundtrips_through_yaml() {
        let m = sample_manifest();
        let yaml = serde_yaml::to_string(&m).unwrap();
        let back: Manifest = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(m, back);
    }
}
