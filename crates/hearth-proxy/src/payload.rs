//! The admin-API payload the proxy manager pushes to the reverse proxy.
//!
//! Holds no routing state of its own: [`crate::ProxyManager::build_payload`]
//! reads the current route tables from [`hearth_registry::Registry`] every
//! time and serializes a complete snapshot.

use serde::{Deserialize, Serialize};

/// A complete reverse-proxy configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyPayload {
    /// Listener ports/hosts the proxy binds.
    pub listeners: Vec<Listener>,
    /// Path-ordered handlers, evaluated first match wins.
    pub handlers: Vec<PathHandler>,
    /// TCP listeners for raw service routes.
    pub tcp_listeners: Vec<TcpListenerSpec>,
    /// What to do when no handler matches.
    pub fallback: Fallback,
    /// TLS issuance policy for the listeners.
    pub tls: TlsPolicy,
}

/// One HTTP(S) listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listener {
    /// Bind host, e.g. `"0.0.0.0"`.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

/// One path-routed handler: strips its `path_prefix` and forwards upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathHandler {
    /// Path prefix to match, e.g. `/demo` or `/services/demo-rpc`.
    pub path_prefix: String,
    /// Upstream URL to forward stripped requests to.
    pub upstream: String,
    /// Whether the path_prefix is stripped before forwarding.
    pub strip_prefix: bool,
    /// What kind of route produced this handler, for proxy-side diagnostics.
    pub kind: HandlerKind,
}

/// Origin of a [`PathHandler`], kept for proxy-side diagnostics only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// A deployment's web UI route.
    WebUi,
    /// An HTTP service route.
    HttpService,
}

/// A raw TCP listener forwarding to a single upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TcpListenerSpec {
    /// External port clients connect to.
    pub external_port: u16,
    /// Upstream host to forward to.
    pub upstream_host: String,
    /// Upstream port to forward to.
    pub upstream_port: u16,
}

/// Behavior when no [`PathHandler`] matches a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Fallback {
    /// Serve the bundled static UI (production).
    StaticUi {
        /// Directory the proxy should serve from.
        root: String,
    },
    /// Forward to the dev-server upstream (development).
    DevServer {
        /// Dev server URL.
        upstream: String,
    },
}

/// TLS issuance policy for the proxy's listeners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Use the internal ACME issuer pointed at the local certificate authority.
    InternalAcme {
        /// ACME directory URL of the local CA.
        directory_url: String,
        /// Path to the CA's root certificate, trusted by clients.
        ca_root_path: String,
    },
    /// Fall back to the proxy's own internal self-signed CA.
    SelfSigned,
}

impl ProxyPayload {
    /// Build a handler for a deployment's web UI route.
    pub fn ui_handler(path: &str, upstream: &str) -> PathHandler {
        PathHandler {
            path_prefix: path.to_string(),
            upstream: upstream.to_string(),
            strip_prefix: true,
            kind: HandlerKind::WebUi,
        }
    }

    /// Build a handler for an HTTP service route.
    pub fn http_service_handler(path: &str, upstream_host: &str, upstream_port: u16) -> PathHandler {
        PathHandler {
            path_prefix: path.to_string(),
            upstream: format!("http://{upstream_host}:{upstream_port}"),
            strip_prefix: true,
            kind: HandlerKind::HttpService,
        }
    }

    /// Build a listener spec for a TCP service route.
    pub fn tcp_listener(external_port: u16, upstream_host: &str, upstream_port: u16) -> TcpListenerSpec {
        TcpListenerSpec {
            external_port,
            upstream_host: upstream_host.to_string(),
            upstream_port,
        }
    }
}
