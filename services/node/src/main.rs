//! Actor node entry point

use actor_node::{demo::Counter, Node};
use anyhow::{Context, Result};
use clap::Parser;
use runtime_config::{init_logging, RuntimeConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML); `ACTORS_*` variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Id under which the demo counter is exposed; empty disables it
    #[arg(long, default_value = "counter")]
    counter_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = RuntimeConfig::load(args.config.as_deref())?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config.logging)?;
    info!("Starting actor node {}", config.node.name);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let node = Node::start(&config).await?;
    if !args.counter_id.is_empty() {
        node.registry()
            .expose(Counter::default(), args.counter_id.as_str())
            .await
            .context("Failed to expose demo counter")?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Shutdown signal received");
    node.shutdown().await;
    Ok(())
}
