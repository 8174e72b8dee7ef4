//! # Domain Entities
//!
//! The broker-neutral data model shared by the adapters, the messaging core
//! and its collaborators.

use crate::errors::{MqError, MqResult};
use crate::utils::{generate_id, mask_password};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Consumer group used when neither the request nor the connection names one.
pub const DEFAULT_CONSUMER_GROUP: &str = "mq-toolkit-default-consumer";

/// Discriminator selecting the adapter family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerType {
    /// Partitioned-log broker.
    Kafka,
    /// AMQP queue broker.
    #[serde(rename = "rabbitmq")]
    RabbitMq,
    /// Remoting broker with a name server.
    #[serde(rename = "rocketmq")]
    RocketMq,
}

impl BrokerType {
    pub const ALL: [BrokerType; 3] = [BrokerType::Kafka, BrokerType::RabbitMq, BrokerType::RocketMq];

    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerType::Kafka => "kafka",
            BrokerType::RabbitMq => "rabbitmq",
            BrokerType::RocketMq => "rocketmq",
        }
    }
}

impl fmt::Display for BrokerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrokerType {
    type Err = MqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(BrokerType::Kafka),
            "rabbitmq" => Ok(BrokerType::RabbitMq),
            "rocketmq" => Ok(BrokerType::RocketMq),
            other => Err(MqError::config(format!("unsupported broker type: {}", other))),
        }
    }
}

/// One broker endpoint as stored by the configuration store.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub broker_type: BrokerType,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// AMQP virtual host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vhost: Option<String>,
    /// Default consumer group for group-based brokers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Per-adapter tuning parameters.
    #[serde(default)]
    pub extra: HashMap<String, String>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, broker_type: BrokerType, host: impl Into<String>, port: u16) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            name: name.into(),
            broker_type,
            host: host.into(),
            port,
            username: None,
            password: None,
            vhost: None,
            group_id: None,
            extra: HashMap::new(),
            created: now,
            updated: now,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = Some(vhost.into());
        self
    }

    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Non-empty extra parameter.
    pub fn extra_value(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Parse an extra parameter, failing with a Config error on bad input.
    pub fn extra_parse<T>(&self, key: &str) -> MqResult<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.extra_value(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                MqError::config(format!("invalid value for extra parameter '{}'", key))
                    .with_details(e.to_string())
            }),
        }
    }

    /// Username and password when both are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("broker_type", &self.broker_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_deref().map(mask_password))
            .field("vhost", &self.vhost)
            .field("group_id", &self.group_id)
            .field("extra", &self.extra)
            .finish()
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} @ {})", self.name, self.broker_type, self.address())
    }
}

/// One message to publish.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub connection_id: String,
    pub topic: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Explicit partition, honoured by partitioned-log brokers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
}

impl ProduceRequest {
    pub fn new(connection_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            topic: topic.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    #[must_use]
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }
}

/// Parameters of a consume loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub connection_id: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub from_beginning: bool,
    #[serde(default = "default_auto_commit")]
    pub auto_commit: bool,
}

fn default_auto_commit() -> bool {
    true
}

impl ConsumeRequest {
    pub fn new<I, S>(connection_id: impl Into<String>, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            connection_id: connection_id.into(),
            topics: topics.into_iter().map(Into::into).collect(),
            group_id: String::new(),
            from_beginning: false,
            auto_commit: true,
        }
    }

    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    #[must_use]
    pub fn from_beginning(mut self, from_beginning: bool) -> Self {
        self.from_beginning = from_beginning;
        self
    }

    #[must_use]
    pub fn auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Request group, then the connection default, then [`DEFAULT_CONSUMER_GROUP`].
    pub fn resolve_group_id(&self, config: &ConnectionConfig) -> String {
        if !self.group_id.trim().is_empty() {
            return self.group_id.clone();
        }
        match config.group_id.as_deref() {
            Some(group) if !group.trim().is_empty() => group.to_string(),
            _ => DEFAULT_CONSUMER_GROUP.to_string(),
        }
    }
}

/// Normalized received message. Build with [`MessageBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: String,
    topic: String,
    key: String,
    value: String,
    headers: HashMap<String, String>,
    partition: i32,
    offset: i64,
    timestamp: DateTime<Utc>,
}

impl Message {
    pub fn builder(topic: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(topic)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Builder for [`Message`]. Missing ids are generated, missing timestamps
/// default to now.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    id: Option<String>,
    topic: String,
    key: String,
    value: String,
    headers: HashMap<String, String>,
    partition: i32,
    offset: i64,
    timestamp: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            id: None,
            topic: topic.into(),
            key: String::new(),
            value: String::new(),
            headers: HashMap::new(),
            partition: 0,
            offset: 0,
            timestamp: None,
        }
    }

    /// Broker-supplied id; empty ids are ignored.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.is_empty() {
            self.id = Some(id);
        }
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = partition;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Millisecond epoch timestamp; out-of-range values are ignored.
    pub fn timestamp_millis(mut self, millis: i64) -> Self {
        if let Some(ts) = DateTime::<Utc>::from_timestamp_millis(millis) {
            self.timestamp = Some(ts);
        }
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id.unwrap_or_else(generate_id),
            topic: self.topic,
            key: self.key,
            value: self.value,
            headers: self.headers,
            partition: self.partition,
            offset: self.offset,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Outcome of a connectivity probe. Never absent, even on internal faults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub success: bool,
    pub message: String,
    pub latency_ms: u64,
}

impl TestResult {
    pub fn ok(message: impl Into<String>, started: Instant) -> Self {
        Self {
            success: true,
            message: message.into(),
            latency_ms: elapsed_ms(started),
        }
    }

    pub fn failed(message: impl Into<String>, started: Instant) -> Self {
        Self {
            success: false,
            message: message.into(),
            latency_ms: elapsed_ms(started),
        }
    }

    /// Re-measure latency from an earlier instant.
    #[must_use]
    pub fn measured_from(mut self, started: Instant) -> Self {
        self.latency_ms = elapsed_ms(started);
        self
    }
}

/// Milliseconds since `started`, saturating.
pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Topic or queue metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopicInfo {
    pub name: String,
    pub partitions: i32,
    pub replicas: i16,
}

impl TopicInfo {
    pub fn new(name: impl Into<String>, partitions: i32, replicas: i16) -> Self {
        Self {
            name: name.into(),
            partitions,
            replicas,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerGroup {
    pub id: String,
    pub members: Vec<String>,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicRequest {
    pub connection_id: String,
    pub topic: String,
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default = "default_replicas")]
    pub replicas: i16,
}

fn default_partitions() -> i32 {
    1
}

fn default_replicas() -> i16 {
    1
}

impl CreateTopicRequest {
    pub fn new(connection_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            topic: topic.into(),
            partitions: default_partitions(),
            replicas: default_replicas(),
        }
    }

    #[must_use]
    pub fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    #[must_use]
    pub fn replicas(mut self, replicas: i16) -> Self {
        self.replicas = replicas;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTopicRequest {
    pub connection_id: String,
    pub topic: String,
}

impl DeleteTopicRequest {
    pub fn new(connection_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            topic: topic.into(),
        }
    }
}

/// What a history record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Produce,
    Consume,
    TestConnection,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Produce => "produce",
            HistoryKind::Consume => "consume",
            HistoryKind::TestConnection => "test_connection",
        }
    }
}

/// One produce, consume or test outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub connection_id: String,
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    #[serde(default)]
    pub topic: String,
    pub success: bool,
    pub message: String,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(
        connection_id: impl Into<String>,
        kind: HistoryKind,
        topic: impl Into<String>,
        success: bool,
        message: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: generate_id(),
            connection_id: connection_id.into(),
            kind,
            topic: topic.into(),
            success,
            message: message.into(),
            latency_ms,
            created_at: Utc::now(),
        }
    }
}
