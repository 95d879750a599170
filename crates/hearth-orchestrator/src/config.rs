//! Orchestrator startup configuration.
//!
//! Values load from an optional YAML file first, then environment
//! variables override or fill gaps, falling back to
//! `dirs::data_local_dir()` for default state paths.
//! [`OrchestratorConfig::finalize`] enforces that missing required values
//! are fatal at startup in production.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Deployment environment, gating which fields are mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEnv {
    /// Local/dev: plaintext session transport and a loopback core server
    /// are permitted without an explicit auth token.
    Development,
    /// Fleet deployment: TLS and an auth token are required for every
    /// non-core server.
    Production,
}

impl std::str::FromStr for NodeEnv {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(NodeEnv::Production),
            "development" | "dev" => Ok(NodeEnv::Development),
            other => Err(format!("unknown NODE_ENV '{other}', expected development|production")),
        }
    }
}

/// Raw, partially-populated configuration as read from a YAML file.
/// Every field optional: environment variables fill whatever this omits.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub node_env: Option<String>,
    pub orchestrator_url: Option<String>,
    pub server_id: Option<uuid::Uuid>,
    pub auth_token: Option<String>,
    pub db_path: Option<PathBuf>,
    pub manifest_dir: Option<PathBuf>,
    pub product: Option<String>,
    pub proxy_admin_url: Option<String>,
    pub proxy_app_name: Option<String>,
    pub domain: Option<String>,
    pub jwt_secret: Option<String>,
    pub bcrypt_cost: Option<u32>,
    pub tcp_port_min: Option<u16>,
    pub tcp_port_max: Option<u16>,
    pub session_listen: Option<String>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub ca_root_cert_path: Option<PathBuf>,
    pub bootstrap_priority_first: Option<String>,
    pub secret_encryption_key: Option<String>,
}

impl RawConfig {
    /// Parse a YAML config file. A missing file is not an error here — the
    /// caller decides whether that's fatal after merging with the
    /// environment.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::ConfigFile(format!("{}: {e}", path.display())))?;
        serde_yaml::from_str(&text).map_err(|e| Error::ConfigFile(format!("{}: {e}", path.display())))
    }

    /// Overlay environment variables on top of whatever the file supplied;
    /// env vars win when both are set.
    pub fn merge_env(mut self) -> Self {
        macro_rules! env_str {
            ($field:ident, $var:literal) => {
                if let Ok(v) = std::env::var($var) {
                    self.$field = Some(v);
                }
            };
        }
        env_str!(node_env, "NODE_ENV");
        env_str!(orchestrator_url, "ORCHESTRATOR_URL");
        env_str!(auth_token, "AUTH_TOKEN");
        env_str!(proxy_admin_url, "PROXY_ADMIN_URL");
        env_str!(proxy_app_name, "PROXY_APP_NAME");
        env_str!(domain, "DOMAIN");
        env_str!(jwt_secret, "JWT_SECRET");
        env_str!(product, "HEARTH_PRODUCT");
        env_str!(session_listen, "SESSION_LISTEN");
        env_str!(bootstrap_priority_first, "BOOTSTRAP_PRIORITY_FIRST");
        env_str!(secret_encryption_key, "SECRET_ENCRYPTION_KEY");

        if let Ok(v) = std::env::var("SERVER_ID") {
            self.server_id = v.parse().ok();
        }
        if let Ok(v) = std::env::var("DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MANIFEST_DIR") {
            self.manifest_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("BCRYPT_COST") {
            self.bcrypt_cost = v.parse().ok();
        }
        if let Ok(v) = std::env::var("TCP_PORT_MIN") {
            self.tcp_port_min = v.parse().ok();
        }
        if let Ok(v) = std::env::var("TCP_PORT_MAX") {
            self.tcp_port_max = v.parse().ok();
        }
        if let Ok(v) = std::env::var("TLS_CERT_PATH") {
            self.tls_cert_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("TLS_KEY_PATH") {
            self.tls_key_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("CA_ROOT_CERT_PATH") {
            self.ca_root_cert_path = Some(PathBuf::from(v));
        }
        self
    }
}

/// Fully-resolved orchestrator configuration.
pub struct OrchestratorConfig {
    pub node_env: NodeEnv,
    pub orchestrator_url: String,
    pub server_id: uuid::Uuid,
    pub auth_token: Option<String>,
    pub db_path: PathBuf,
    pub manifest_dir: PathBuf,
    pub product: String,
    pub proxy_admin_url: String,
    pub proxy_app_name: String,
    pub domain: Option<String>,
    pub jwt_secret: Option<String>,
    pub bcrypt_cost: u32,
    pub tcp_port_min: u16,
    pub tcp_port_max: u16,
    pub session_listen: String,
    pub tls: Option<(PathBuf, PathBuf)>,
    pub ca_root_cert_path: Option<PathBuf>,
    pub bootstrap_priority_first: Option<String>,
    pub secret_encryption_key: [u8; 32],
}

const DEFAULT_BCRYPT_COST: u32 = 12;
const DEFAULT_TCP_PORT_MIN: u16 = 20000;
const DEFAULT_TCP_PORT_MAX: u16 = 29999;

impl RawConfig {
    /// Validate and fill defaults, rejecting configurations production
    /// cannot run with.
    pub fn finalize(self) -> Result<OrchestratorConfig> {
        let node_env = match self.node_env.as_deref() {
            Some(s) => s.parse().map_err(Error::Config)?,
            None => NodeEnv::Development,
        };

        let server_id = self.server_id.unwrap_or_else(|| {
            // The core server's id is deterministic within one installation:
            // derived once and then persisted in the store's server row, not
            // re-derived here. A config that omits it entirely only works
            // for a non-core agent process talking back to an already-
            // provisioned orchestrator, so a random id is a safe placeholder
            // that a real deployment always overrides via SERVER_ID.
            uuid::Uuid::new_v4()
        });

        let is_core_loopback = self.orchestrator_url.as_deref().map(|u| u.contains("127.0.0.1") || u.contains("localhost")).unwrap_or(true);

        if node_env == NodeEnv::Production && self.auth_token.is_none() && !is_core_loopback {
            return Err(Error::Config("AUTH_TOKEN is required in production unless the orchestrator runs on loopback".into()));
        }

        let db_path = self.db_path.unwrap_or_else(|| {
            dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("hearth").join("store")
        });

        let manifest_dir = self.manifest_dir.ok_or_else(|| Error::Config("manifest_dir (MANIFEST_DIR) is required".into()))?;

        let product = self.product.unwrap_or_else(|| "hearth".to_string());

        let proxy_admin_url = self.proxy_admin_url.ok_or_else(|| Error::Config("proxy_admin_url (PROXY_ADMIN_URL) is required".into()))?;

        let proxy_app_name = self.proxy_app_name.unwrap_or_else(|| "proxy".to_string());

        let tls = match (self.tls_cert_path, self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => {
                if node_env == NodeEnv::Production {
                    return Err(Error::Config("TLS_CERT_PATH/TLS_KEY_PATH are required in production".into()));
                }
                None
            }
            _ => return Err(Error::Config("TLS_CERT_PATH and TLS_KEY_PATH must be set together".into())),
        };

        let secret_encryption_key = match self.secret_encryption_key {
            Some(hex) => decode_hex_key(&hex)?,
            None => {
                if node_env == NodeEnv::Production {
                    return Err(Error::Config("SECRET_ENCRYPTION_KEY is required in production".into()));
                }
                // Development only: a fixed key keeps the store readable
                // across restarts without requiring operators to mint one.
                [7u8; 32]
            }
        };

        Ok(OrchestratorConfig {
            node_env,
            orchestrator_url: self.orchestrator_url.unwrap_or_else(|| "127.0.0.1:7443".to_string()),
            server_id,
            auth_token: self.auth_token,
            db_path,
            manifest_dir,
            product,
            proxy_admin_url,
            proxy_app_name,
            domain: self.domain,
            jwt_secret: self.jwt_secret,
            bcrypt_cost: self.bcrypt_cost.unwrap_or(DEFAULT_BCRYPT_COST),
            tcp_port_min: self.tcp_port_min.unwrap_or(DEFAULT_TCP_PORT_MIN),
            tcp_port_max: self.tcp_port_max.unwrap_or(DEFAULT_TCP_PORT_MAX),
            session_listen: self.session_listen.unwrap_or_else(|| "0.0.0.0:7444".to_string()),
            tls,
            ca_root_cert_path: self.ca_root_cert_path,
            secret_encryption_key,
            bootstrap_priority_first: self.bootstrap_priority_first,
        })
    }
}

/// Decode a 64-character hex string into a 32-byte key.
fn decode_hex_key(hex: &str) -> Result<[u8; 32]> {
    if hex.len() != 64 {
        return Err(Error::Config("SECRET_ENCRYPTION_KEY must be 64 hex characters (32 bytes)".into()));
    }
    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| Error::Config("SECRET_ENCRYPTION_KEY is not valid hex".into()))?;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RawConfig {
        RawConfig { manifest_dir: Some("/tmp/manifests".into()), proxy_admin_url: Some("http://127.0.0.1/load".into()), ..Default::default() }
    }

    #[test]
    fn development_defaults_fill_in_without_auth_token() {
        let cfg = base().finalize().unwrap();
        assert_eq!(cfg.node_env, NodeEnv::Development);
        assert_eq!(cfg.bcrypt_cost, DEFAULT_BCRYPT_COST);
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn production_without_auth_token_fails_off_loopback() {
        let mut raw = base();
        raw.node_env = Some("production".into());
        raw.orchestrator_url = Some("fleet.internal:7443".into());
        assert!(raw.finalize().is_err());
    }

    #[test]
    fn production_on_loopback_does_not_require_auth_token() {
        let mut raw = base();
        raw.node_env = Some("production".into());
        raw.orchestrator_url = Some("127.0.0.1:7443".into());
        raw.tls_cert_path = Some("/tmp/cert.pem".into());
        raw.tls_key_path = Some("/tmp/key.pem".into());
        raw.secret_encryption_key = Some("11".repeat(32));
        assert!(raw.finalize().is_ok());
    }

    #[test]
    fn production_requires_secret_encryption_key() {
        let mut raw = base();
        raw.node_env = Some("production".into());
        raw.orchestrator_url = Some("127.0.0.1:7443".into());
        raw.tls_cert_path = Some("/tmp/cert.pem".into());
        raw.tls_key_path = Some("/tmp/key.pem".into());
        assert!(raw.finalize().is_err());
    }

    #[test]
    fn malformed_secret_encryption_key_rejects() {
        let mut raw = base();
        raw.secret_encryption_key = Some("not-hex".into());
        assert!(raw.finalize().is_err());
    }

    #[test]
    fn mismatched_tls_paths_reject() {
        let mut raw = base();
        raw.tls_cert_path = Some("/tmp/cert.pem".into());
        assert!(raw.finalize().is_err());
    }

    #[test]
    fn missing_manifest_dir_rejects() {
        let mut raw = RawConfig { proxy_admin_url: Some("http://x/load".into()), ..Default::default() };
        raw.manifest_dir = None;
        assert!(raw.finalize().is_err());
    }
}
