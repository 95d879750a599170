//! Proxy manager.

pub mod error;
pub mod manager;
pub mod payload;
pub mod tls;

pub use error::{Error, Result};
pub use manager::{ProxyManager, ProxyManagerConfig};
pub use payload::{Fallback, HandlerKind, Listener, PathHandler, ProxyPayload, TcpListenerSpec, TlsPolicy};
