use anyhow::{Context, Result};
use tracing::info;

mod config;
mod server;
mod telemetry;

use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first: it decides the log format
    let server_config = ServerConfig::from_env().context("Failed to load server configuration")?;

    telemetry::init(server_config.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("Anonchat Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    server_config.log_config();

    server::start(server_config).await?;

    telemetry::shutdown();

    Ok(())
}
