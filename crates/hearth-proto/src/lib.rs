//! Shared domain and wire types for the hearth fleet orchestrator.
//!
//! Every other `hearth-*` crate depends on this one for the tagged-union
//! shapes that cross a process boundary (session frames, helper requests)
//! and for the row types the store persists. Nothing in here talks to a
//! socket or a database; it's data plus the handful of pure helpers that
//! belong next to it.

pub mod auth;
pub mod command;
pub mod deployment;
pub mod error;
pub mod helper;
pub mod manifest;
pub mod route;
pub mod secret;
pub mod server;
pub mod service;
pub mod session;

pub use auth::{AgentToken, User, UserRole};
pub use command::{Action, AgentCommand, CommandAck, CommandOutcome, CommandResult};
pub use deployment::{Deployment, DeploymentStatus};
pub use error::ErrorKind;
pub use helper::{HelperRequest, HelperResponse};
pub use manifest::{
    ConfigField, ConfigFieldType, Locality, LoggingSpec, Manifest, Protocol, ServiceDef, ServiceReq, UserConfig, WebUi,
};
pub use route::{ProxyRoute, ServiceRoute};
pub use secret::SecretBlob;
pub use server::{AgentStatus, Server};
pub use service::{ServiceRecord, ServiceStatus};
pub use session::{AgentEvent, AgentStatusReport, ServerEvent, SessionAuth};
