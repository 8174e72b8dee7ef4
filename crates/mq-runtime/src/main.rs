use anyhow::{Context, Result};
use mq_runtime::{MqRuntime, RuntimeConfig, DEFAULT_CONFIG_PATH};
use mq_telemetry::{init_telemetry, TelemetryConfig};
use std::path::PathBuf;
use tracing::info;

/// First argument, then `MQ_CONFIG`, then the default path.
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MQ_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = RuntimeConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let mut telemetry = TelemetryConfig::from_env().with_format(&config.log.format);
    if std::env::var("MQ_LOG_LEVEL").is_err() && std::env::var("RUST_LOG").is_err() {
        telemetry = telemetry.with_log_level(config.log.level.clone());
    }
    let _telemetry = init_telemetry(telemetry).context("Failed to initialise telemetry")?;
    info!(path = %path.display(), "Configuration loaded");

    let runtime = MqRuntime::new(config)?;
    runtime.start().await;

    info!("Runtime is up. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
