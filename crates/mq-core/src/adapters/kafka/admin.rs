use super::errors::map_kafka_error;
use super::settings::KafkaSettings;
use super::FAMILY;
use crate::adapters::{ensure_broker_type, not_connected, validate_topic};
use crate::ports::{Admin, Lifecycle};
use async_trait::async_trait;
use parking_lot::RwLock;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::KafkaError;
use rdkafka::metadata::Metadata;
use shared_types::{
    BrokerType, ConnectionConfig, ConsumerGroup, MqError, MqResult, TestResult, TopicInfo,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

type NativeAdmin = AdminClient<DefaultClientContext>;

#[derive(Clone)]
struct Session {
    client: Arc<NativeAdmin>,
    settings: KafkaSettings,
}

/// Owned view of cluster metadata.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClusterSnapshot {
    pub brokers: Vec<String>,
    pub topics: Vec<TopicInfo>,
}

impl ClusterSnapshot {
    fn from_metadata(metadata: &Metadata) -> Self {
        let brokers = metadata
            .brokers()
            .iter()
            .map(|b| format!("{}:{}", b.host(), b.port()))
            .collect();

        let mut topics: Vec<TopicInfo> = metadata
            .topics()
            .iter()
            .filter(|t| t.error().is_none())
            .map(|t| {
                let partitions = i32::try_from(t.partitions().len()).unwrap_or(i32::MAX);
                let replicas = t
                    .partitions()
                    .first()
                    .map(|p| i16::try_from(p.replicas().len()).unwrap_or(i16::MAX))
                    .unwrap_or(0);
                TopicInfo::new(t.name(), partitions, replicas)
            })
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));

        Self { brokers, topics }
    }
}

async fn fetch_cluster(client: Arc<NativeAdmin>, timeout: Duration) -> MqResult<ClusterSnapshot> {
    tokio::task::spawn_blocking(move || {
        client
            .inner()
            .fetch_metadata(None, timeout)
            .map(|metadata| ClusterSnapshot::from_metadata(&metadata))
    })
    .await
    .map_err(|e| MqError::internal("metadata task failed").with_details(e.to_string()))?
    .map_err(|e| map_kafka_error("failed to fetch cluster metadata", &e))
}

/// Topic administration over librdkafka's admin API.
#[derive(Default)]
pub struct KafkaAdmin {
    session: RwLock<Option<Session>>,
}

impl KafkaAdmin {
    fn session(&self) -> MqResult<Session> {
        self.session.read().clone().ok_or_else(|| not_connected(FAMILY))
    }

    /// Admin client bootstrapped with every live broker, so requests reach
    /// the controller whichever node was dialed first.
    async fn controller_admin(&self, session: &Session) -> MqResult<NativeAdmin> {
        let cluster = fetch_cluster(session.client.clone(), session.settings.timeout).await?;
        if cluster.brokers.is_empty() {
            return Err(MqError::connection("cluster metadata lists no brokers"));
        }
        debug!(brokers = ?cluster.brokers, "Routing admin request through live brokers");
        session
            .settings
            .config_for(&cluster.brokers.join(","))
            .create()
            .map_err(|e| map_kafka_error("failed to create admin client", &e))
    }

    fn options(session: &Session) -> AdminOptions {
        AdminOptions::new()
            .request_timeout(Some(session.settings.timeout))
            .operation_timeout(Some(session.settings.timeout))
    }
}

fn check_topic_results(
    action: &str,
    results: Vec<Result<String, (String, rdkafka::types::RDKafkaErrorCode)>>,
) -> MqResult<()> {
    for result in results {
        if let Err((topic, code)) = result {
            return Err(map_kafka_error(&format!("failed to {} topic {}", action, topic), &KafkaError::AdminOp(code)));
        }
    }
    Ok(())
}

#[async_trait]
impl Lifecycle for KafkaAdmin {
    /// Verifies reachability by fetching cluster metadata.
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()> {
        ensure_broker_type(config, BrokerType::Kafka)?;
        let settings = KafkaSettings::from_config(config)?;
        let client: NativeAdmin = settings
            .base_config()
            .create()
            .map_err(|e| map_kafka_error("failed to create admin client", &e))?;
        let client = Arc::new(client);

        let cluster = fetch_cluster(client.clone(), settings.timeout).await?;
        info!(
            address = %config.address(),
            brokers = cluster.brokers.len(),
            "Kafka admin connected"
        );
        *self.session.write() = Some(Session { client, settings });
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        self.session.write().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.read().is_some()
    }
}

#[async_trait]
impl Admin for KafkaAdmin {
    async fn test_connection(&self) -> TestResult {
        let started = Instant::now();
        let session = match self.session() {
            Ok(session) => session,
            Err(_) => return TestResult::failed("Not connected to Kafka", started),
        };
        match fetch_cluster(session.client, session.settings.timeout).await {
            Ok(cluster) => TestResult::ok(
                format!("Connected successfully. Found {} brokers", cluster.brokers.len()),
                started,
            ),
            Err(e) => TestResult::failed(format!("Failed to get brokers: {}", e), started),
        }
    }

    async fn list_topics(&self) -> MqResult<Vec<TopicInfo>> {
        let session = self.session()?;
        Ok(fetch_cluster(session.client, session.settings.timeout).await?.topics)
    }

    async fn create_topic(&self, name: &str, partitions: i32, replicas: i16) -> MqResult<()> {
        validate_topic(name)?;
        if partitions < 1 || replicas < 1 {
            return Err(MqError::validation("partitions and replicas must be at least 1")
                .with_details(format!("partitions={} replicas={}", partitions, replicas)));
        }
        let session = self.session()?;
        let admin = self.controller_admin(&session).await?;

        let topic = NewTopic::new(name, partitions, TopicReplication::Fixed(i32::from(replicas)));
        let results = admin
            .create_topics(&[topic], &Self::options(&session))
            .await
            .map_err(|e| map_kafka_error("failed to create topic", &e))?;
        check_topic_results("create", results)?;
        info!(topic = name, partitions, replicas, "Created Kafka topic");
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> MqResult<()> {
        validate_topic(name)?;
        let session = self.session()?;
        let admin = self.controller_admin(&session).await?;

        let results = admin
            .delete_topics(&[name], &Self::options(&session))
            .await
            .map_err(|e| map_kafka_error("failed to delete topic", &e))?;
        check_topic_results("delete", results)?;
        info!(topic = name, "Deleted Kafka topic");
        Ok(())
    }

    async fn list_consumer_groups(&self) -> MqResult<Vec<ConsumerGroup>> {
        let session = self.session()?;
        let timeout = session.settings.timeout;
        let client = session.client;
        tokio::task::spawn_blocking(move || {
            client.inner().fetch_group_list(None, timeout).map(|list| {
                list.groups()
                    .iter()
                    .map(|g| ConsumerGroup {
                        id: g.name().to_string(),
                        members: g.members().iter().map(|m| m.client_id().to_string()).collect(),
                        topics: Vec::new(),
                    })
                    .collect()
            })
        })
        .await
        .map_err(|e| MqError::internal("group list task failed").with_details(e.to_string()))?
        .map_err(|e| map_kafka_error("failed to list consumer groups", &e))
    }
}
