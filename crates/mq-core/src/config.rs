//! Messaging core configuration.

use serde::{Deserialize, Serialize};
use shared_types::{MqError, MqResult};
use std::time::Duration;

/// Timeouts and limits of the messaging core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Upper bound for one produce, admin or stop call.
    pub operation_timeout_ms: u64,
    /// Upper bound for establishing a broker session.
    pub connect_timeout_ms: u64,
    /// How long a stop waits for the consume loop to return.
    pub stop_grace_ms: u64,
    /// Records kept by the in-memory history store.
    pub history_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            stop_grace_ms: 5_000,
            history_capacity: 1_000,
        }
    }
}

impl CoreConfig {
    /// Defaults overridden by `MQ_OPERATION_TIMEOUT_MS`, `MQ_CONNECT_TIMEOUT_MS`,
    /// `MQ_STOP_GRACE_MS` and `MQ_HISTORY_CAPACITY`. Unparseable values are
    /// ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("MQ_OPERATION_TIMEOUT_MS") {
            config.operation_timeout_ms = v;
        }
        if let Some(v) = env_parse("MQ_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = v;
        }
        if let Some(v) = env_parse("MQ_STOP_GRACE_MS") {
            config.stop_grace_ms = v;
        }
        if let Some(v) = env_parse("MQ_HISTORY_CAPACITY") {
            config.history_capacity = v;
        }
        config
    }

    pub fn validate(&self) -> MqResult<()> {
        if self.operation_timeout_ms == 0 {
            return Err(MqError::config("operation_timeout_ms cannot be 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(MqError::config("connect_timeout_ms cannot be 0"));
        }
        if self.history_capacity == 0 {
            return Err(MqError::config("history_capacity cannot be 0"));
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
