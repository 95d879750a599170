//! Privileged root helper daemon.
//!
//! Must run as root. Listens on a Unix domain socket in a directory owned by
//! the agent principal; socket permissions restrict the peer to that user.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use hearth_helper::HelperConfig;

#[derive(Parser)]
#[command(name = "hearth-helperd")]
#[command(about = "Privileged host helper for the hearth agent", long_about = None)]
struct Args {
    /// Unix domain socket path.
    #[arg(long, default_value = "/run/hearth/helper.sock")]
    socket: PathBuf,

    /// Directory recording registered service names.
    #[arg(long, default_value = "/var/lib/hearth/registered-services")]
    registry_dir: PathBuf,

    /// Product prefix bounding the path allow-lists.
    #[arg(long, default_value = "hearth")]
    product: String,
}

fn main() -> Result<()> {
    // The helper logs structured JSON to stdout.1, unlike
    // every other component's human-readable `fmt` layer.
    tracing_subscriber::fmt().json().with_target(false).init();

    let args = Args::parse();
    let config = Arc::new(HelperConfig::for_product(&args.product, &args.registry_dir));

    smol::block_on(async { hearth_helper::server::serve(&args.socket, 0o660, config).await })?;
    Ok(())
}
