//! Privileged root helper: a standalone
//! root-run daemon listening on a Unix domain socket, validating every
//! request against an explicit allow-list before it touches the host.

pub mod allowlist;
pub mod error;
pub mod handler;
pub mod mount_creds;
pub mod registration;
pub mod server;

pub use allowlist::{CommandAllowlist, PathAllowlist, ValuePatterns};
pub use error::{Error, Result};
pub use handler::{handle, HelperConfig};
pub use mount_creds::CredentialsFile;
pub use registration::ServiceRegistrationGate;
