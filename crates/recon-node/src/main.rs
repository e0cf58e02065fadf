//! Recon node entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use recon_node::{NodeConfig, NodeRuntime};

/// Encrypted remote-command gateway
#[derive(Parser, Debug)]
#[command(name = "recon-node")]
#[command(about = "Serve authenticated remote commands over HTTP")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port (overrides the file and RECON_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of partition owner threads
    #[arg(long)]
    partitions: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install subscriber: {e}"))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install subscriber: {e}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs)?;

    // Load configuration
    let mut config = NodeConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.gateway.http.port = port;
    }
    if let Some(partitions) = args.partitions {
        config.host.partitions = partitions;
    }
    config.validate()?;

    let mut runtime = NodeRuntime::build(config).await?;
    runtime.start().await?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await
}
