//! relayfs server binary.
//!
//! Usage:
//!   relayfs-server --config relayfs.toml
//!   relayfs-server --config relayfs.toml --bind 0.0.0.0:7457 --root /srv/proj

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relayfs_server::ServerConfig;
use tracing_subscriber::{EnvFilter, fmt};

/// Serve a directory over the relayfs protocol.
#[derive(Parser, Debug)]
#[command(name = "relayfs-server", version)]
#[command(about = "Serve a directory over the relayfs protocol")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Listen address, overriding the file
    #[arg(long)]
    bind: Option<String>,

    /// Directory relative paths resolve against, overriding the file
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(root) = args.root {
        config.root = Some(root);
    }

    tracing::info!(bind = %config.bind, root = ?config.root, "starting relayfs server");
    relayfs_server::run(config).await?;
    Ok(())
}
