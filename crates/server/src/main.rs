//! Property valuation server
//!
//! Serves price estimates for Chilean residential listings from a
//! trained model artifact.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use valuation_server::{api, build_state, config::ServerConfig};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting valuation-server");

    let config = ServerConfig::load()?;
    info!(
        model_dir = %config.model_dir.display(),
        artifact = %config.artifact,
        "Server configured"
    );

    let state = build_state(&config).await?;
    state
        .logger
        .log_startup(SERVICE_VERSION, state.service.model_version());

    let addr = config.bind_addr();
    api::serve(&addr, state.clone(), async {
        // Wait for shutdown signal
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    state.logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    Ok(())
}
