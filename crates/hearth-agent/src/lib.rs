//! Host agent: maintains one persistent
//! session to the orchestrator, dispatches commands through
//! `hearth-executor`, and reports status on an interval and on demand.

pub mod backoff;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod helper_client;
pub mod session;
pub mod status;
pub mod transport;

pub use backoff::Backoff;
pub use connection::AgentConnection;
pub use dispatch::{Dispatcher, LogSourceProvider, StaticLogSources};
pub use error::{Error, Result};
pub use helper_client::UnixSocketHelperClient;
pub use session::{AgentSession, SessionConfig};
pub use status::{AppStatusProvider, StaticAppStatus, SystemStatusCollector};
