//! Process entry point: logging, configuration, bootstrap and graceful
//! shutdown on ctrl-c.

use std::sync::Arc;

use api::{AppConfig, LogNotifier};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    let app = api::init(config, Arc::new(LogNotifier)).await?;
    let stats = app.jobs.stats().await?;
    tracing::info!(queued = stats.queued, processed = stats.processed, "server running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    api::shutdown().await;
    Ok(())
}
