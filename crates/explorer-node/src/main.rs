//! Stagehand explorer node.
//!
//! Connects to a Stagehand server, declares the `explorer` capability,
//! and executes file-manager actions on this machine:
//!
//! - `explorer.ping`          — availability probe
//! - `explorer.open_folder`   — open a folder in the file manager
//! - `explorer.reveal_file`   — select a file in the file manager
//!
//! Usage:
//!   stagehand-explorer-node --config node.toml
//!
//! The auth token can also come from `STAGEHAND_NODE_TOKEN`.

mod config;
mod explorer;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use stagehand_node_sdk::{ActionPolicy, NodeClient, NodeClientError, PluginRegistry};

use crate::config::NodeConfig;
use crate::explorer::ExplorerPlugin;

#[derive(Parser)]
#[command(name = "stagehand-explorer-node", version, about = "Stagehand file explorer node")]
struct Cli {
    /// Path to the node configuration file.
    #[arg(long, short = 'c')]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::load(&cli.config)?;

    let mut plugins = PluginRegistry::new();
    for name in &config.plugins {
        match name.as_str() {
            "explorer" => {
                plugins.register(ExplorerPlugin::new());
            }
            other => tracing::warn!(plugin = %other, "unknown plugin in config, skipping"),
        }
    }
    if plugins.is_empty() {
        anyhow::bail!("no plugins enabled; nothing to serve");
    }

    let policy = ActionPolicy::new(config.whitelist.clone(), config.allowed_paths.clone());

    let client = NodeClient::builder()
        .server_url(&config.server_url)
        .token(&config.token)
        .node_id(&config.node_id)
        .version(env!("CARGO_PKG_VERSION"))
        .heartbeat_interval(Duration::from_secs(config.heartbeat_interval_secs))
        .policy(policy)
        .build()?;

    tracing::info!(
        node_id = %config.node_id,
        server_url = %config.server_url,
        whitelist = config.whitelist.len(),
        allowed_paths = config.allowed_paths.len(),
        "starting explorer node"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    match client.run(plugins, shutdown).await {
        Ok(()) | Err(NodeClientError::Shutdown) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
