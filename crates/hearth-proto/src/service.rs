//! Service records: what a deployment advertises to the rest of the fleet.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An instance of a [`crate::manifest::ServiceDef`] provided by a running deployment.
///
/// Unique on `(deployment_id, service_name)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    /// Opaque service record id.
    pub id: Uuid,
    /// The deployment providing this service.
    pub deployment_id: Uuid,
    /// Service name, matches `ServiceDef::name` in the manifest.
    pub service_name: String,
    /// Server the deployment runs on.
    pub server_id: Uuid,
    /// Host a consumer should dial: loopback if consumer is co-located with
    /// the provider, otherwise the provider server's actual host.
    pub host: String,
    /// Port the service listens on.
    pub port: u16,
    /// Availability as last observed.
    pub status: ServiceStatus,
}

/// Availability of a [`ServiceRecord`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// The service is reachable and ready for consumers.
    Available,
    /// The service is registered but not currently reachable.
    Unavailable,
}
