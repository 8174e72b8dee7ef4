use super::management::ManagementClient;
use super::session::{declare_durable, delete_queue, AmqpSettings, Session};
use super::FAMILY;
use crate::adapters::{ensure_broker_type, not_connected, validate_topic};
use crate::ports::{Admin, Lifecycle};
use async_trait::async_trait;
use lapin::options::QueueDeclareOptions;
use lapin::types::FieldTable;
use parking_lot::RwLock;
use shared_types::{
    generate_id, BrokerType, ConnectionConfig, ConsumerGroup, MqResult, TestResult, TopicInfo,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Queue administration. Listing goes through the management API since
/// AMQP itself cannot enumerate queues.
#[derive(Default)]
pub struct AmqpAdmin {
    session: RwLock<Option<Arc<Session>>>,
}

impl AmqpAdmin {
    fn session(&self) -> MqResult<Arc<Session>> {
        self.session.read().clone().ok_or_else(|| not_connected(FAMILY))
    }

    /// Declare and drop an exclusive auto-delete queue.
    async fn probe(session: &Session) -> Result<(), String> {
        let name = format!("mq-toolkit-probe-{}", generate_id());
        let options = QueueDeclareOptions {
            exclusive: true,
            auto_delete: true,
            ..QueueDeclareOptions::default()
        };
        let queue = session
            .channel
            .queue_declare(&name, options, FieldTable::default())
            .await
            .map_err(|e| format!("Failed to declare test queue: {}", e))?;
        delete_queue(&session.channel, queue.name().as_str())
            .await
            .map_err(|e| format!("Failed to delete test queue: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for AmqpAdmin {
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()> {
        ensure_broker_type(config, BrokerType::RabbitMq)?;
        let session = Session::open(AmqpSettings::from_config(config)?).await?;
        info!(uri = %session.settings.display_uri(), "AMQP admin connected");
        let previous = self.session.write().replace(Arc::new(session));
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        let session = self.session.write().take();
        if let Some(session) = session {
            session.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.read().as_ref().is_some_and(|s| s.is_open())
    }
}

#[async_trait]
impl Admin for AmqpAdmin {
    async fn test_connection(&self) -> TestResult {
        let started = Instant::now();
        let Ok(session) = self.session() else {
            return TestResult::failed("Not connected to RabbitMQ", started);
        };
        if !session.connection.status().connected() {
            return TestResult::failed("Connection is closed", started);
        }
        match Self::probe(&session).await {
            Ok(()) => TestResult::ok("Connected successfully to RabbitMQ", started),
            Err(message) => TestResult::failed(message, started),
        }
    }

    /// Degrades to an empty list when the management API is unavailable.
    async fn list_topics(&self) -> MqResult<Vec<TopicInfo>> {
        let session = self.session()?;
        let queues = match ManagementClient::new(&session.settings)?.list_queues().await {
            Ok(queues) => queues,
            Err(e) => {
                warn!(error = %e, "Management API unavailable; returning no queues");
                return Ok(Vec::new());
            }
        };
        let mut topics: Vec<TopicInfo> = queues
            .into_iter()
            .map(|q| TopicInfo::new(q.name, 1, 1))
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    async fn create_topic(&self, name: &str, _partitions: i32, _replicas: i16) -> MqResult<()> {
        validate_topic(name)?;
        let session = self.session()?;
        declare_durable(&session.channel, name).await?;
        info!(queue = name, "Declared AMQP queue");
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> MqResult<()> {
        validate_topic(name)?;
        let session = self.session()?;
        let dropped = delete_queue(&session.channel, name).await?;
        info!(queue = name, dropped_messages = dropped, "Deleted AMQP queue");
        Ok(())
    }

    async fn list_consumer_groups(&self) -> MqResult<Vec<ConsumerGroup>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ErrorKind;

    #[tokio::test]
    async fn test_unconnected_probe() {
        let admin = AmqpAdmin::default();
        let result = admin.test_connection().await;
        assert!(!result.success);
        assert_eq!(result.message, "Not connected to RabbitMQ");
        assert!(admin.list_consumer_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_topic_name_checked_first() {
        let admin = AmqpAdmin::default();
        let err = admin.create_topic("", 1, 1).await.unwrap_err();
        assert!(err.is_kind(ErrorKind::Validation));
        let err = admin.delete_topic("orders").await.unwrap_err();
        assert!(err.is_kind(ErrorKind::Connection));
    }

    #[tokio::test]
    async fn test_unreachable_broker() {
        let admin = AmqpAdmin::default();
        let cfg = ConnectionConfig::new("r", BrokerType::RabbitMq, "127.0.0.1", 1);
        let err = admin.connect(&cfg).await.unwrap_err();
        assert!(err.is_kind(ErrorKind::Connection) || err.is_kind(ErrorKind::Network));
        assert!(!admin.is_connected());
    }
}
