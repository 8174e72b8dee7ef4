//! # Runtime Configuration
//!
//! JSON file holding log settings, core tuning and the connection list.
//! A missing file is created with defaults on first load.

use mq_core::CoreConfig;
use serde::{Deserialize, Serialize};
use shared_types::ConnectionConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/mq-toolkit.json";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write config file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level or full filter directive.
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub log: LogConfig,
    pub core: CoreConfig,
    pub connections: Vec<ConnectionConfig>,
    /// Prometheus text file written at shutdown, for a textfile collector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_file: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Read `path`, writing the defaults there first when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let data = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, data).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.core
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !matches!(self.log.format.as_str(), "json" | "pretty") {
            return Err(ConfigError::Invalid(format!(
                "log.format must be json or pretty, got {:?}",
                self.log.format
            )));
        }
        for (i, conn) in self.connections.iter().enumerate() {
            if conn.id.trim().is_empty() || conn.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "connections[{}] needs a non-empty id and name",
                    i
                )));
            }
            if self.connections[..i].iter().any(|c| c.id == conn.id) {
                return Err(ConfigError::Invalid(format!("duplicate connection id {:?}", conn.id)));
            }
        }
        Ok(())
    }
}
