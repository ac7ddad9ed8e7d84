//! HTTP/WebSocket server binary for cadenza.

use std::net::SocketAddr;
use std::path::PathBuf;

use cadenza::{router, OrchestratorConfig, ServerBuilder};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// cadenza: real-time speech-to-speech conversational orchestrator.
#[derive(Parser)]
#[command(name = "cadenza-server", version, about)]
struct Cli {
    /// Path to a TOML configuration file. Falls back to defaults if absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, default_value = "127.0.0.1:8700")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cadenza=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => OrchestratorConfig::load_from_file(path)?,
        None => OrchestratorConfig::default(),
    };

    let state = ServerBuilder::new(config).build();
    let background = cadenza::server::spawn_background_tasks(state.clone());

    let app = router(state);
    let listener = TcpListener::bind(cli.bind).await?;
    info!(addr = %cli.bind, "cadenza server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for handle in background {
        handle.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received Ctrl+C, shutting down...");
    }
}
