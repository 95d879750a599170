//! Agent-side executor: turns a command
//! envelope into file writes, scrubbed-environment script runs, and
//! privileged-helper calls, behind a path sandbox.

pub mod env;
pub mod error;
pub mod executor;
pub mod logs;
pub mod sandbox;

pub use env::{build_script_env, AppEnvContext};
pub use error::{Error, Result};
pub use executor::{
    ConfigFile, ConfigurePayload, DiskUsage, Executor, HelperClient, InstallPayload, MountInfo,
};
pub use logs::{FollowEvent, LogFollowHandle, LogFollower, LogSources, LogTail, MAX_TAIL_BYTES};
pub use sandbox::PathSandbox;
