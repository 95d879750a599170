//! The deployer: a transactional install/configure/start/stop/uninstall
//! pipeline over a per-server mutex, with compensating rollback on failure,
//! secret generation, audit emission, and the system-apps bootstrap loop
//! that installs mandatory infrastructure apps on the core server.

pub mod audit;
pub mod bootstrap;
pub mod compensation;
pub mod deployer;
pub mod dispatch;
pub mod error;
pub mod mutex;
pub mod secrets;
pub mod template;

pub use audit::AuditLog;
pub use bootstrap::BootstrapLoop;
pub use compensation::CompensationStack;
pub use deployer::{Deployer, DeployerConfig};
pub use dispatch::{AgentDispatcher, ManifestProvider, StaticManifestProvider};
pub use error::{Error, Result};
pub use mutex::MutexManager;
pub use secrets::SecretStore;
pub use template::{FsTemplateSource, ScriptKind, TemplateSource};
