use anyhow::Result;
use api_gate::config::Config;
use api_gate::server::Server;
use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "api-gate", version, about = "Rate limited backend API")]
struct Cli {
    /// Address to listen on, overrides BIND_ADDR
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// Log level for this service when RUST_LOG is unset, overrides LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("api_gate={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting api-gate service");
    tracing::info!(
        bind_addr = %config.bind_addr,
        environment = %config.environment,
        api_version = %config.api_version,
        strict_max = config.rate_limit_strict_max,
        api_max = config.rate_limit_api_max,
        "Configuration loaded"
    );

    let server =
        Server::new(config).map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
