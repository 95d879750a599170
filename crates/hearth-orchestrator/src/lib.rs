//! Composition root: configuration resolution, the session-accept server,
//! the fleet's user and agent-token stores, and the binary wiring that ties
//! the deployer, registry, and proxy manager together into one running
//! daemon.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod manifests;
pub mod server;
pub mod sessions;
pub mod tokens;
pub mod users;

pub use config::{NodeEnv, OrchestratorConfig, RawConfig};
pub use core::Core;
pub use error::{Error, Result};
pub use manifests::FsManifestProvider;
pub use sessions::SessionRegistry;
pub use tokens::TokenStore;
pub use users::UserStore;
