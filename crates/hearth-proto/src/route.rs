//! Proxy and service routes: the entries that drive the reverse proxy config.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manifest::Protocol;

/// A web UI route, keyed by `deployment_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyRoute {
    /// Opaque route id.
    pub id: Uuid,
    /// The deployment this route exposes the UI for.
    pub deployment_id: Uuid,
    /// Path prefix the proxy matches and strips, e.g. `/demo`.
    pub path: String,
    /// Upstream URL to forward to, e.g. `http://127.0.0.1:8080`.
    pub upstream: String,
    /// Whether the route is currently published.
    pub active: bool,
}

/// A route exposing a single [`crate::service::ServiceRecord`], keyed by `service_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRoute {
    /// Opaque route id.
    pub id: Uuid,
    /// The service record this route exposes.
    pub service_id: Uuid,
    /// Whether this is an HTTP path route or a TCP port route.
    pub route_type: Protocol,
    /// Path the proxy matches, e.g. `/services/<name>`. HTTP routes only.
    #[serde(default)]
    pub external_path: Option<String>,
    /// Port allocated from the configured TCP range. TCP routes only.
    #[serde(default)]
    pub external_port: Option<u16>,
    /// Upstream host to forward to.
    pub upstream_host: String,
    /// Upstream port to forward to.
    pub upstream_port: u16,
    /// Whether the route is currently published.
    pub active: bool,
}

impl ServiceRoute {
    /// The conventional external path for an HTTP service route.
    pub fn http_external_path(service_name: &str) -> String {
        format!("/services/{service_name}")
    }
}
