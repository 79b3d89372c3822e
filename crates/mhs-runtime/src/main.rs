//! # Message Handling Service
//!
//! Process entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use mhs_runtime::{MhsRuntime, RuntimeConfig};
use mhs_telemetry::{init_telemetry, TelemetryConfig};
use mhs_workflow::adapters::HttpTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let _telemetry = init_telemetry(TelemetryConfig::from_env())?;

    // Load configuration
    let config = RuntimeConfig::from_env()?;
    let registry = config.load_registry()?;

    let transport =
        HttpTransport::with_timeout(config.http_timeout).context("Failed to build HTTP client")?;

    let runtime = MhsRuntime::new(&config, registry, Arc::new(transport));
    runtime.start();

    info!("Service is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;

    Ok(())
}
