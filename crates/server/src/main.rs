use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use stagehand_server::auth::StaticTokenProvider;
use stagehand_server::config::ServerConfig;
use stagehand_server::state::AppState;

#[derive(Parser)]
#[command(name = "stagehand", version, about = "Stagehand control server")]
struct Cli {
    /// Path to the server configuration file.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    let auth = Arc::new(StaticTokenProvider::from_config(&config.auth));
    if auth.token_count() == 0 {
        tracing::warn!("no node tokens configured; every credential will be rejected");
    }

    let bind = config.bind.clone();
    let grace_secs = config.heartbeat_grace_secs;
    let state = AppState::new(config, auth);

    // Background sweep: close sessions that went silent past the grace
    // window. Eviction then runs through the normal disconnect path, so
    // their pending commands fail too.
    let sweep_nodes = state.nodes.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(grace_secs.max(1) / 3 + 1));
        loop {
            interval.tick().await;
            for session in sweep_nodes.stale_sessions(grace_secs as i64) {
                tracing::warn!(
                    session_id = %session.session_id,
                    "closing session with no traffic inside the grace window"
                );
                session.close();
            }
        }
    });

    let app = stagehand_server::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(bind = %bind, version = env!("CARGO_PKG_VERSION"), "stagehand server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stagehand_server=debug"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
