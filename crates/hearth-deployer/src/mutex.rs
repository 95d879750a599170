//! Per-server and per-deployment async mutexes: a pair of id-keyed lock
//! tables. Deployer operations hold these across `.await` points, so the
//! inner lock is `smol::lock::Mutex` (the `async-lock` crate smol itself
//! depends on and re-exports), not a std mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use smol::lock::Mutex;
use uuid::Uuid;

/// Hands out one lock per server id and one per deployment id, creating
/// table entries on first use and never removing server locks (the fleet's
/// server set is small and long-lived) while deployment locks are freed
/// explicitly on uninstall to avoid an unbounded table.
#[derive(Default)]
pub struct MutexManager {
    servers: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    deployments: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl MutexManager {
    /// Build an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the per-server lock serializing state-changing operations
    /// against `server_id`, creating it if this is the first use. The
    /// returned guard owns its `Arc`, so it may outlive this call.
    pub async fn lock_server_owned(&self, server_id: Uuid) -> ServerGuard {
        let handle = {
            let mut table = self.servers.lock().expect("server mutex table poisoned");
            table.entry(server_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        ServerGuard::acquire(handle).await
    }

    /// Acquire the per-deployment lock, creating it if this is the first use.
    pub async fn lock_deployment_owned(&self, deployment_id: Uuid) -> DeploymentGuard {
        let handle = {
            let mut table = self.deployments.lock().expect("deployment mutex table poisoned");
            table.entry(deployment_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        DeploymentGuard::acquire(handle).await
    }

    /// Drop a deployment's lock entry entirely. Called once uninstall has
    /// fully completed so the table doesn't grow without bound.
    pub fn release_deployment(&self, deployment_id: Uuid) {
        self.deployments.lock().expect("deployment mutex table poisoned").remove(&deployment_id);
    }
}

/// An acquired per-server lock, holding the `Arc` it was taken from so the
/// guard may be returned from an `async fn` without borrowing the table.
pub struct ServerGuard {
    _handle: Arc<Mutex<()>>,
    guard: Option<smol::lock::MutexGuardArc<()>>,
}

impl ServerGuard {
    async fn acquire(handle: Arc<Mutex<()>>) -> Self {
        let guard = handle.lock_arc().await;
        Self { _handle: handle, guard: Some(guard) }
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.guard.take();
    }
}

/// An acquired per-deployment lock; see [`ServerGuard`].
pub struct DeploymentGuard {
    _handle: Arc<Mutex<()>>,
    guard: Option<smol::lock::MutexGuardArc<()>>,
}

impl DeploymentGuard {
    async fn acquire(handle: Arc<Mutex<()>>) -> Self {
        let guard = handle.lock_arc().await;
        Self { _handle: handle, guard: Some(guard) }
    }
}

impl Drop for DeploymentGuard {
    fn drop(&mut self) {
        self.guard.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn distinct_servers_do_not_contend() {
        let manager = MutexManager::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _g1 = manager.lock_server_owned(a).await;
        let _g2 = manager.lock_server_owned(b).await;
    }

    #[smol_potat::test]
    async fn dropping_a_guard_allows_a_subsequent_lock_on_the_same_id() {
        let manager = MutexManager::new();
        let id = Uuid::new_v4();
        {
            let _g = manager.lock_server_owned(id).await;
        }
        let _g2 = manager.lock_server_owned(id).await;
    }

    #[smol_potat::test]
    async fn release_deployment_drops_the_table_entry() {
        let manager = MutexManager::new();
        let id = Uuid::new_v4();
        {
            let _g = manager.lock_deployment_owned(id).await;
        }
        manager.release_deployment(id);
        assert!(manager.deployments.lock().unwrap().get(&id).is_none());
    }
}
