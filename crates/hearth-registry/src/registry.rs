//! Service & route registry.
//!
//! Tracks `(deployment, name, host, port)` service records alongside proxy
//! routes (web UI, keyed by deployment) and service routes (HTTP or TCP,
//! keyed by service), including the bounded TCP port allocator.

use std::sync::Mutex;

use hearth_proto::{
    AgentStatus, Protocol, ProxyRoute, Server, ServiceRecord, ServiceRoute, ServiceStatus,
};
use hearth_store::{Store, Tree};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ports::PortAllocator;

/// In-process handle to the service & route registry's persisted state.
pub struct Registry {
    servers: Tree<Server>,
    services: Tree<ServiceRecord>,
    proxy_routes: Tree<ProxyRoute>,
    service_routes: Tree<ServiceRoute>,
    ports: Mutex<PortAllocator>,
}

impl Registry {
    /// Open the registry over an already-migrated [`Store`], rebuilding the
    /// TCP port allocator's in-use set from existing service routes.
    pub fn open(store: &Store, tcp_min: u16, tcp_max: u16) -> Result<Self> {
        let servers = store.tree("servers")?;
        let services = store.tree("services")?;
        let proxy_routes = store.tree("proxy_routes")?;
        let service_routes: Tree<ServiceRoute> = store.tree("service_routes")?;

        let in_use = service_routes
            .scan()?
            .into_iter()
            .filter_map(|r| r.external_port)
            .collect::<Vec<_>>();

        Ok(Self {
            servers,
            services,
            proxy_routes,
            service_routes,
            ports: Mutex::new(PortAllocator::new(tcp_min, tcp_max, in_use)),
        })
    }

    // ---- services -------------------------------------------------------

    /// Upsert a service record on `(deployment_id, service_name)`. The
    /// recorded host is loopback when the server is core, else its
    /// configured host.
    pub fn register_service(
        &self,
        deployment_id: Uuid,
        service_name: &str,
        server_id: Uuid,
        port: u16,
    ) -> Result<ServiceRecord> {
        let host = self.server_host(server_id)?;

        let existing = self
            .services
            .scan()?
            .into_iter()
            .find(|s| s.deployment_id == deployment_id && s.service_name == service_name);

        let record = ServiceRecord {
            id: existing.as_ref().map(|s| s.id).unwrap_or_else(Uuid::new_v4),
            deployment_id,
            service_name: service_name.to_string(),
            server_id,
            host,
            port,
            status: ServiceStatus::Available,
        };
        self.services.put(record.id.as_bytes(), &record)?;
        Ok(record)
    }

    /// Remove a service record by `(deployment_id, service_name)`.
    pub fn unregister_service(&self, deployment_id: Uuid, service_name: &str) -> Result<()> {
        if let Some(rec) = self
            .services
            .scan()?
            .into_iter()
            .find(|s| s.deployment_id == deployment_id && s.service_name == service_name)
        {
            self.services.remove(rec.id.as_bytes())?;
        }
        Ok(())
    }

    /// Remove every service record for a deployment (used by uninstall).
    pub fn unregister_services_for_deployment(&self, deployment_id: Uuid) -> Result<Vec<ServiceRecord>> {
        let mut removed = Vec::new();
        for rec in self.services.scan()? {
            if rec.deployment_id == deployment_id {
                self.services.remove(rec.id.as_bytes())?;
                removed.push(rec);
            }
        }
        Ok(removed)
    }

    /// Any available provider of `name`, fleet-wide.
    pub fn find_service(&self, name: &str) -> Result<Option<ServiceRecord>> {
        Ok(self
            .services
            .scan()?
            .into_iter()
            .find(|s| s.service_name == name && s.status == ServiceStatus::Available))
    }

    /// Every provider of `name`, regardless of availability.
    pub fn find_all_services(&self, name: &str) -> Result<Vec<ServiceRecord>> {
        Ok(self
            .services
            .scan()?
            .into_iter()
            .filter(|s| s.service_name == name)
            .collect())
    }

    /// The provider of `name` on a specific server, if any (locality-restricted lookup).
    pub fn find_service_on_server(&self, name: &str, server_id: Uuid) -> Result<Option<ServiceRecord>> {
        Ok(self
            .services
            .scan()?
            .into_iter()
            .find(|s| s.service_name == name && s.server_id == server_id))
    }

    /// The host a consumer on `from_server_id` should dial for `name`.
    ///
    /// Returns the loopback host when `prefer_same_server` and a same-host
    /// provider exists; otherwise the first available provider's actual
    /// host.
    pub fn get_connection(
        &self,
        name: &str,
        from_server_id: Uuid,
        prefer_same_server: bool,
    ) -> Result<Option<String>> {
        if prefer_same_server && self.find_service_on_server(name, from_server_id)?.is_some() {
            return Ok(Some("127.0.0.1".to_string()));
        }
        Ok(self.find_service(name)?.map(|s| s.host))
    }

    // ---- proxy routes (web UI, keyed by deployment) ----------------------

    /// Upsert the web UI proxy route for a deployment.
    pub fn register_proxy_route(&self, deployment_id: Uuid, path: &str, upstream: &str) -> Result<ProxyRoute> {
        let existing = self
            .proxy_routes
            .scan()?
            .into_iter()
            .find(|r| r.deployment_id == deployment_id);
        let route = ProxyRoute {
            id: existing.as_ref().map(|r| r.id).unwrap_or_else(Uuid::new_v4),
            deployment_id,
            path: path.to_string(),
            upstream: upstream.to_string(),
            active: true,
        };
        self.proxy_routes.put(route.id.as_bytes(), &route)?;
        Ok(route)
    }

    /// Flip a deployment's web UI route's `active` flag (start/stop).
    pub fn set_proxy_route_active(&self, deployment_id: Uuid, active: bool) -> Result<()> {
        if let Some(mut route) = self
            .proxy_routes
            .scan()?
            .into_iter()
            .find(|r| r.deployment_id == deployment_id)
        {
            route.active = active;
            self.proxy_routes.put(route.id.as_bytes(), &route)?;
        }
        Ok(())
    }

    /// Remove a deployment's web UI route.
    pub fn unregister_proxy_route(&self, deployment_id: Uuid) -> Result<()> {
        if let Some(route) = self
            .proxy_routes
            .scan()?
            .into_iter()
            .find(|r| r.deployment_id == deployment_id)
        {
            self.proxy_routes.remove(route.id.as_bytes())?;
        }
        Ok(())
    }

    /// Every currently active web UI route.
    pub fn active_proxy_routes(&self) -> Result<Vec<ProxyRoute>> {
        Ok(self.proxy_routes.scan()?.into_iter().filter(|r| r.active).collect())
    }

    // ---- service routes (HTTP path or TCP port, keyed by service) -------

    /// Register the proxy-facing route for a service record. HTTP routes
    /// get the conventional `/services/<name>` path; TCP routes allocate a
    /// port from the configured range.
    pub fn register_service_route(
        &self,
        service: &ServiceRecord,
        route_type: Protocol,
    ) -> Result<ServiceRoute> {
        let existing = self
            .service_routes
            .scan()?
            .into_iter()
            .find(|r| r.service_id == service.id);

        let (external_path, external_port) = match route_type {
            Protocol::Http => (Some(ServiceRoute::http_external_path(&service.service_name)), None),
            Protocol::Tcp => {
                if let Some(prior) = existing.as_ref().and_then(|r| r.external_port) {
                    (None, Some(prior))
                } else {
                    let mut ports = self.ports.lock().expect("port allocator lock poisoned");
                    (None, Some(ports.allocate(service.port)?))
                }
            }
        };

        let route = ServiceRoute {
            id: existing.as_ref().map(|r| r.id).unwrap_or_else(Uuid::new_v4),
            service_id: service.id,
            route_type,
            external_path,
            external_port,
            upstream_host: service.host.clone(),
            upstream_port: service.port,
            active: true,
        };
        self.service_routes.put(route.id.as_bytes(), &route)?;
        Ok(route)
    }

    /// Remove a service route, releasing its TCP port allocation if any.
    pub fn unregister_service_route(&self, service_id: Uuid) -> Result<()> {
        if let Some(route) = self
            .service_routes
            .scan()?
            .into_iter()
            .find(|r| r.service_id == service_id)
        {
            if let Some(port) = route.external_port {
                self.ports.lock().expect("port allocator lock poisoned").release(port);
            }
            self.service_routes.remove(route.id.as_bytes())?;
        }
        Ok(())
    }

    /// Every currently active service route.
    pub fn active_service_routes(&self) -> Result<Vec<ServiceRoute>> {
        Ok(self.service_routes.scan()?.into_iter().filter(|r| r.active).collect())
    }

    /// Upsert a server row (used by tests and the composition root's server CRUD).
    pub fn put_server(&self, server: &Server) -> Result<()> {
        self.servers.put(server.id.as_bytes(), server)?;
        Ok(())
    }

    /// Fetch a server row by id.
    pub fn get_server(&self, server_id: Uuid) -> Result<Option<Server>> {
        Ok(self.servers.get(server_id.as_bytes())?)
    }

    /// Every known server row.
    pub fn list_servers(&self) -> Result<Vec<Server>> {
        Ok(self.servers.scan()?)
    }

    /// The address other components should dial to reach `server_id`: the
    /// loopback address for the core server, else its configured host
    /// (falling back to its name if no host was recorded).
    pub fn server_host(&self, server_id: Uuid) -> Result<String> {
        let server = self
            .servers
            .get(server_id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("server {server_id}")))?;
        Ok(if server.is_core {
            "127.0.0.1".to_string()
        } else {
            server.host.clone().unwrap_or_else(|| server.name.clone())
        })
    }

    /// Mark a server's observed agent session status.
    pub fn set_agent_status(&self, server_id: Uuid, status: AgentStatus) -> Result<()> {
        if let Some(mut s) = self.servers.get(server_id.as_bytes())? {
            s.agent_status = status;
            self.servers.put(s.id.as_bytes(), &s)?;
        }
        Ok(())
    }

    /// Record a freshly-received status report: marks the server online,
    /// stamps `last_seen`, and stores the latest metrics/network info.
    pub fn record_status(&self, server_id: Uuid, report: &hearth_proto::AgentStatusReport) -> Result<()> {
        if let Some(mut s) = self.servers.get(server_id.as_bytes())? {
            s.agent_status = AgentStatus::Online;
            s.metrics = Some(report.metrics.clone());
            s.network_info = report.network_info.clone();
            s.last_seen = Some(report.timestamp);
            self.servers.put(s.id.as_bytes(), &s)?;
        }
        Ok(())
    }
}
