use anyhow::Result;
use jparser::config::Config;
use jparser::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Load configuration from arguments and environment
    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("jparser={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting jparser service");
    tracing::info!(
        "Configuration: bind_address={}, rate_limit={}/s per client",
        config.bind_address,
        config.requests_per_second
    );

    let server = Server::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    let reason = server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    tracing::info!(reason = %reason, "Shutdown server");
    Ok(())
}
