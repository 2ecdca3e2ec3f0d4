//! XLN node entry point.
//!
//! Starts the node with configuration from a TOML file or defaults.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use xln_node::{XlnConfig, XlnNode};

/// XLN Node
#[derive(Parser, Debug)]
#[command(name = "xln-node", version, about = "XLN entity consensus node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "xln.toml")]
    config: PathBuf,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the log format (text, json).
    #[arg(long)]
    log_format: Option<String>,

    /// Do not persist replica snapshots.
    #[arg(long)]
    ephemeral: bool,

    /// Generate a starter config file and exit.
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if args.init {
        XlnConfig::template()
    } else {
        XlnConfig::load(&args.config)?
    };

    // Apply CLI overrides
    if let Some(ref data_dir) = args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if args.ephemeral {
        config.storage.persist = false;
    }

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    // Handle --init flag
    if args.init {
        config.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "wrote starter config");
        return Ok(());
    }

    tracing::info!("XLN Node v{}", env!("CARGO_PKG_VERSION"));

    let mut node = XlnNode::new(config)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        tracing::info!("received shutdown signal");
    };

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "node loop error");
            }
        }
        _ = shutdown => {
            tracing::info!("initiating graceful shutdown");
        }
    }

    node.shutdown().await?;
    tracing::info!("XLN node exited cleanly");
    Ok(())
}
