//! Host agent daemon.
//!
//! Connects to the orchestrator's session endpoint, executes dispatched
//! commands against this host through the privileged helper, and reports
//! status on an interval. Reconnects with [`hearth_agent::Backoff`] on
//! any disconnect; SIGTERM/SIGINT request a clean drain instead of an
//! abrupt exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hearth_agent::{AgentSession, Dispatcher, SessionConfig, StaticAppStatus, UnixSocketHelperClient};
use hearth_executor::Executor;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hearth-agentd")]
#[command(about = "Host agent for the hearth orchestrator", long_about = None)]
struct Args {
    /// Orchestrator session endpoint, `host:port`.
    #[arg(long)]
    orchestrator: String,

    /// Path to the private root certificate PEM trusted for `wss://`.
    /// Omit to connect over plaintext `ws://` (development only).
    #[arg(long)]
    root_cert: Option<PathBuf>,

    /// This server's id.
    #[arg(long)]
    server_id: Uuid,

    /// Bearer token proving this agent's identity to the orchestrator.
    #[arg(long, env = "HEARTH_AGENT_TOKEN")]
    token: String,

    /// Privileged helper's Unix domain socket.
    #[arg(long, default_value = "/run/hearth/helper.sock")]
    helper_socket: PathBuf,

    /// Product prefix for this agent's path sandbox.
    #[arg(long, default_value = "hearth")]
    product: String,

    /// Run without the privileged helper, falling back to local
    /// `start.sh`/`stop.sh` scripts.
    #[arg(long)]
    dev_mode: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    let root_cert_pem = args
        .root_cert
        .as_ref()
        .map(std::fs::read_to_string)
        .transpose()
        .context("reading root certificate")?;

    let helper = UnixSocketHelperClient::new(&args.helper_socket);
    let executor = Executor::new(&args.product, helper, args.dev_mode);
    let dispatcher = Dispatcher::new(executor, Box::new(hearth_agent::StaticLogSources::default()));

    let config = SessionConfig {
        orchestrator_url: args.orchestrator,
        root_cert_pem,
        server_id: args.server_id,
        token: args.token,
    };

    let session = AgentSession::new(config, dispatcher, Arc::new(StaticAppStatus(Vec::new())));
    let draining = session.drain_handle();

    #[cfg(unix)]
    {
        signal_hook::flag::register(signal_hook::consts::SIGTERM, draining.clone())
            .context("registering SIGTERM handler")?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, draining.clone())
            .context("registering SIGINT handler")?;
    }

    smol::block_on(session.run());
    Ok(())
}
