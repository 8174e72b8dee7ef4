//! # MQ Toolkit Runtime
//!
//! Composition root for the messaging core.
//!
//! ## Startup Sequence
//!
//! 1. Load the runtime config file (created with defaults when missing)
//! 2. Initialise telemetry from the environment, overridden by the file's `log` section
//! 3. Build the service over the configured connections
//! 4. Start the event logger and probe every connection
//! 5. Run until Ctrl-C, then stop subscriptions and close clients
//! 6. Write the metrics snapshot when `metrics_file` is configured

pub mod config;
pub mod runtime;

pub use config::{ConfigError, LogConfig, RuntimeConfig, DEFAULT_CONFIG_PATH};
pub use runtime::{MqRuntime, SweepResult};
