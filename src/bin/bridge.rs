//! AgentOps Bridge - HTTP/SSE front for the gateway's WebSocket RPC protocol.

use agentops_bridge::bridge::{self, BridgeState};
use agentops_bridge::config::{Config, LogConfig, LogFormat};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---- CLI ----

#[derive(Parser)]
#[command(
    name = "agentops-bridge",
    version = agentops_bridge::VERSION,
    about = "HTTP/SSE bridge to the agent gateway"
)]
struct Args {
    /// Bind address (overrides BIND)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides PORT)
    #[arg(long, short)]
    port: Option<u16>,
}

// ---- Main ----

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_new(&log.level)
        .unwrap_or_else(|_| EnvFilter::new("info,agentops_bridge=debug"));

    match log.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Refuses to start without PROXY_TOKEN
    let mut config = Config::from_env()?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.log);

    // reqwest and tokio-tungstenite share rustls; pin one crypto provider for wss://
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }
    info!("Starting AgentOps Bridge v{}", agentops_bridge::VERSION);

    let state = Arc::new(BridgeState::from_config(&config));
    let app = bridge::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Bridge listening on http://{}", addr);
    info!("GATEWAY_WS_URL={}", config.gateway.url);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Bridge stopped");
    Ok(())
}
