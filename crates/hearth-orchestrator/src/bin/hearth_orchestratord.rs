//! Orchestrator daemon and operator CLI entry point.
//!
//! With no subcommand, runs the session-accept server and the system-apps
//! bootstrap loop until SIGTERM/SIGINT, then broadcasts `server:shutdown`
//! to every connected agent before exiting. With a subcommand, runs one
//! CLI operation against the same store and exits immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hearth_orchestrator::config::RawConfig;
use hearth_orchestrator::{cli, server, Core};

#[derive(Parser)]
#[command(name = "hearth-orchestratord")]
#[command(about = "Fleet orchestrator daemon and operator CLI", long_about = None)]
struct Args {
    /// Path to a YAML config file; environment variables override it.
    #[arg(long, env = "HEARTH_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<cli::Command>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();

    let raw = match &args.config {
        Some(path) => RawConfig::from_file(path)?,
        None => RawConfig::default(),
    };
    let config = raw.merge_env().finalize().context("resolving configuration")?;

    let core = Core::bootstrap(config).context("assembling composition root")?;

    if let Some(command) = args.command {
        std::process::exit(cli::run(&core, command));
    }

    smol::block_on(run_daemon(core))
}

async fn run_daemon(core: Core) -> Result<()> {
    let core = Arc::new(core);
    let shutdown = Arc::new(AtomicBool::new(false));

    #[cfg(unix)]
    {
        signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())
            .context("registering SIGTERM handler")?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone())
            .context("registering SIGINT handler")?;
    }

    let bootstrap_task = core.spawn_bootstrap();

    let tls = match &core.config.tls {
        Some((cert, key)) => Some(server::load_tls_config(cert, key).context("loading TLS configuration")?),
        None => None,
    };

    let handler: Arc<dyn server::SessionHandler> = core.clone();
    let listen_addr = core.config.session_listen.clone();
    let sessions = Arc::clone(&core.sessions);

    let serve_task = smol::spawn(async move {
        if let Err(e) = server::serve(&listen_addr, tls, handler).await {
            tracing::error!(error = %e, "session server exited");
        }
    });

    while !shutdown.load(Ordering::SeqCst) {
        smol::Timer::after(Duration::from_millis(200)).await;
    }

    tracing::info!("shutting down: draining agent sessions");
    sessions.broadcast_shutdown();
    serve_task.cancel().await;
    bootstrap_task.cancel().await;
    Ok(())
}
