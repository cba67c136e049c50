//! `iocom-node` binary: boots a fabric node from a TOML config file.
//!
//! # Usage
//!
//! ```bash
//! iocom-node --config node.toml
//! ```

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use iocom_node::NodeConfig;

/// Runnable IOCOM fabric node
#[derive(Parser, Debug)]
#[command(name = "iocom-node")]
#[command(about = "Runs a fabric node from a TOML config file")]
#[command(version)]
struct Args {
    /// Path to the node's TOML config file
    #[arg(short, long)]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(config = %args.config, "iocom-node starting");

    let config = NodeConfig::load(&args.config)?;
    iocom_node::run(config).await?;

    Ok(())
}
