//! Status report collection: builds a load/memory/disk snapshot from a
//! single `sysinfo::System`.

use hearth_proto::session::{AgentStatusReport, AppStatus, Metrics};
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use uuid::Uuid;

/// Observes an app's run state for inclusion in a status report. The agent
/// implements this against its own app-directory/systemd bookkeeping; tests
/// use a fixed map.
pub trait AppStatusProvider: Send + Sync {
    /// Every app this host currently has any trace of, with its observed state.
    fn observed_apps(&self) -> Vec<AppStatus>;
}

/// Builds an [`AgentStatusReport`] from live system metrics.
pub struct SystemStatusCollector {
    server_id: Uuid,
}

impl SystemStatusCollector {
    /// Build a collector that reports metrics for `server_id`.
    pub fn new(server_id: Uuid) -> Self {
        Self { server_id }
    }

    /// Gather a fresh report, querying CPU/memory/disk/load at call time.
    pub fn collect(&self, apps: &dyn AppStatusProvider) -> AgentStatusReport {
        let mut system = System::new_all();
        system.refresh_all();

        let (disk_used, disk_total) = system
            .disks()
            .iter()
            .map(|d| (d.total_space() - d.available_space(), d.total_space()))
            .fold((0u64, 0u64), |(used, total), (u, t)| (used + u, total + t));

        let load = system.load_average();

        AgentStatusReport {
            server_id: self.server_id,
            timestamp: chrono::Utc::now(),
            metrics: Metrics {
                cpu_percent: system.global_cpu_info().cpu_usage() as f64,
                memory_used: system.used_memory(),
                memory_total: system.total_memory(),
                disk_used,
                disk_total,
                load_average: [load.one, load.five, load.fifteen],
            },
            network_info: None,
            apps: apps.observed_apps(),
        }
    }
}

/// A fixed status provider, for tests and for hosts with no apps installed yet.
pub struct StaticAppStatus(pub Vec<AppStatus>);

impl AppStatusProvider for StaticAppStatus {
    fn observed_apps(&self) -> Vec<AppStatus> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_a_report_with_the_configured_server_id() {
        let collector = SystemStatusCollector::new(Uuid::nil());
        let report = collector.collect(&StaticAppStatus(vec![]));
        assert_eq!(report.server_id, Uuid::nil());
        assert!(report.metrics.memory_total > 0);
    }
}
