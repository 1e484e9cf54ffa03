use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use visio_gateway::{ServerConfig, routes, state::AppState};

/// Visio Gateway - Realtime voice relay with server-side tools
#[derive(Parser, Debug)]
#[command(name = "visio-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Must happen before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // A missing OPENAI_API_KEY fails here and exits nonzero
    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let address = config.address();
    let relay_path = config.relay_path.clone();
    info!(
        "Connecting upstream with key \"{}...\"",
        config.openai_api_key.chars().take(3).collect::<String>()
    );

    let app_state = AppState::new(config);
    let app = routes::create_app(app_state);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    let listener = TcpListener::bind(&socket_addr).await?;
    info!(
        "HTTP and WebSocket server running on http://{} (relay at {})",
        socket_addr, relay_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
