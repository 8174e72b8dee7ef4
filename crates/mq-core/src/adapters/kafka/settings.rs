//! librdkafka configuration derived from a [`ConnectionConfig`].

use rdkafka::ClientConfig;
use shared_types::utils::{parse_comma_separated, parse_duration};
use shared_types::{ConnectionConfig, MqError, MqResult};
use std::time::Duration;

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(10);
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_millis(5_000);
const DEFAULT_SECURITY_PROTOCOL: &str = "SASL_PLAINTEXT";
const DEFAULT_SASL_MECHANISM: &str = "PLAIN";

/// Extras prefixed with this are handed to librdkafka verbatim.
const PASSTHROUGH_PREFIX: &str = "kafka.";

#[derive(Debug, Clone, PartialEq)]
pub struct KafkaSettings {
    /// `host:port` first, then `extra["brokers"]`.
    pub bootstrap: Vec<String>,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_bytes: Option<u32>,
    pub min_bytes: Option<u32>,
    /// Metadata and admin request timeout.
    pub timeout: Duration,
    pub sasl: Option<SaslSettings>,
    pub passthrough: Vec<(String, String)>,
}

#[derive(Clone, PartialEq)]
pub struct SaslSettings {
    pub security_protocol: String,
    pub mechanism: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SaslSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslSettings")
            .field("security_protocol", &self.security_protocol)
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl KafkaSettings {
    pub fn from_config(config: &ConnectionConfig) -> MqResult<Self> {
        let mut bootstrap = vec![config.address()];
        if let Some(extra) = config.extra_value("brokers") {
            for broker in parse_comma_separated(extra) {
                if !bootstrap.contains(&broker) {
                    bootstrap.push(broker);
                }
            }
        }

        let batch_size = config
            .extra_parse::<usize>("batch_size")?
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        let batch_timeout = match config.extra_value("batch_timeout") {
            None => DEFAULT_BATCH_TIMEOUT,
            Some(raw) => parse_duration(raw).ok_or_else(|| {
                MqError::config("invalid value for extra parameter 'batch_timeout'")
                    .with_details(raw.to_string())
            })?,
        };

        let timeout = config
            .extra_parse::<u64>("timeout_ms")?
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_METADATA_TIMEOUT);

        let sasl = config.credentials().map(|(username, password)| SaslSettings {
            security_protocol: config
                .extra_value("security_protocol")
                .unwrap_or(DEFAULT_SECURITY_PROTOCOL)
                .to_string(),
            mechanism: config
                .extra_value("sasl_mechanism")
                .unwrap_or(DEFAULT_SASL_MECHANISM)
                .to_string(),
            username: username.to_string(),
            password: password.to_string(),
        });

        let mut passthrough: Vec<(String, String)> = config
            .extra
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(PASSTHROUGH_PREFIX)
                    .filter(|key| !key.is_empty())
                    .map(|key| (key.to_string(), v.clone()))
            })
            .collect();
        passthrough.sort();

        Ok(Self {
            bootstrap,
            batch_size,
            batch_timeout,
            max_bytes: config.extra_parse::<u32>("max_bytes")?.filter(|v| *v > 0),
            min_bytes: config.extra_parse::<u32>("min_bytes")?.filter(|v| *v > 0),
            timeout,
            sasl,
            passthrough,
        })
    }

    pub fn bootstrap_servers(&self) -> String {
        self.bootstrap.join(",")
    }

    /// Settings shared by every client kind.
    pub fn base_config(&self) -> ClientConfig {
        self.config_for(&self.bootstrap_servers())
    }

    /// Base settings against an explicit broker list.
    pub fn config_for(&self, bootstrap_servers: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("client.id", "mq-toolkit")
            .set("socket.timeout.ms", self.timeout.as_millis().to_string());

        if let Some(sasl) = &self.sasl {
            config
                .set("security.protocol", &sasl.security_protocol)
                .set("sasl.mechanism", &sasl.mechanism)
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }

        for (key, value) in &self.passthrough {
            config.set(key, value);
        }
        config
    }

    pub fn producer_config(&self) -> ClientConfig {
        let mut config = self.base_config();
        config
            .set("linger.ms", self.batch_timeout.as_millis().to_string())
            .set("batch.num.messages", self.batch_size.to_string())
            .set("message.timeout.ms", "30000");
        config
    }

    pub fn consumer_config(&self, group_id: &str, from_beginning: bool, auto_commit: bool) -> ClientConfig {
        let mut config = self.base_config();
        config
            .set("group.id", group_id)
            .set("auto.offset.reset", if from_beginning { "earliest" } else { "latest" })
            .set("enable.auto.commit", auto_commit.to_string())
            .set("enable.partition.eof", "false");
        if let Some(max_bytes) = self.max_bytes {
            config.set("fetch.max.bytes", max_bytes.to_string());
        }
        if let Some(min_bytes) = self.min_bytes {
            config.set("fetch.min.bytes", min_bytes.to_string());
        }
        config
    }
}
