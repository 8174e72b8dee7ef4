//! # MQ Telemetry
//!
//! Observability for the MQ toolkit.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` with an env filter and pretty or JSON output
//! - **Metrics**: Prometheus counters, gauges and histograms
//! - **Traces**: optional OTLP export (`otlp` feature)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mq_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).expect("telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MQ_SERVICE_NAME` | `mq-toolkit` | Service name in logs and traces |
//! | `MQ_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `MQ_JSON_LOGS` | `false` | JSON log output |
//! | `MQ_CONSOLE_OUTPUT` | `true` | Console output |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | unset | Enables OTLP export |

mod config;
mod logging;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{gather_text, register_metrics, MetricsHandle, OperationTimer};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

#[doc(hidden)]
pub use tracing as __tracing;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging, metrics and (optionally) trace export.
///
/// Returns a guard that must be held for the lifetime of the application.
/// With the `otlp` feature enabled this must run inside a tokio runtime.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    let tracing = tracing_setup::init_tracing(&config)?;

    Ok(TelemetryGuard {
        _tracing: tracing,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shut down.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Config("bad level".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad level");
    }
}
