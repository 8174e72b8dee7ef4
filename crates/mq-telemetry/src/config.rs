//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging, metrics and tracing.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for traces and logs
    pub service_name: String,

    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: String,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive
    pub log_level: String,

    /// Whether to enable console output
    pub console_output: bool,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Whether to export spans over OTLP (needs the `otlp` feature)
    pub otlp_enabled: bool,

    /// Deployment environment label
    pub environment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "mq-toolkit".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            otlp_enabled: false,
            environment: "development".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// - `MQ_SERVICE_NAME`: Service name (default: mq-toolkit)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint, enables export when set
    /// - `MQ_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `MQ_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `MQ_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `MQ_ENVIRONMENT`: Environment label (default: development)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();
        let otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

        Self {
            service_name: env::var("MQ_SERVICE_NAME").unwrap_or_else(|_| "mq-toolkit".to_string()),

            otlp_enabled: otlp_endpoint.is_some(),

            otlp_endpoint: otlp_endpoint.unwrap_or_else(|| "http://localhost:4317".to_string()),

            log_level: env::var("MQ_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("MQ_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            json_logs: env::var("MQ_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            environment: env::var("MQ_ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        }
    }

    /// Override the level, typically from a config file.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Select JSON (`"json"`) or pretty output.
    #[must_use]
    pub fn with_format(mut self, format: &str) -> Self {
        self.json_logs = format.eq_ignore_ascii_case("json");
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
