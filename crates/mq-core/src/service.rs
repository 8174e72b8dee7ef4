//! Service facade: the public operations of the messaging core.

use crate::cache::ConnectionCache;
use crate::config::CoreConfig;
use crate::factory::{AdapterFactory, DefaultAdapterFactory};
use crate::orchestrator::{panic_message, SubscriptionInfo, SubscriptionOrchestrator};
use crate::ports::{Client, ConfigStore, EventSink, HistoryStore};
use crate::stores::{InMemoryConfigStore, InMemoryHistoryStore};
use futures::FutureExt;
use mq_telemetry::{log_operation, metrics, OperationTimer};
use shared_bus::NoopEventSink;
use shared_types::utils::format_duration;
use shared_types::{
    elapsed_ms, ConnectionConfig, ConsumeRequest, ConsumerGroup, CreateTopicRequest,
    DeleteTopicRequest, ErrorKind, MqError, MqResult, ProduceRequest, TestResult, TopicInfo,
};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const COMPONENT: &str = "service";

/// Run `fut`, turning a panic into an Internal error.
async fn guarded<T, F>(operation: &'static str, fut: F) -> MqResult<T>
where
    F: Future<Output = MqResult<T>>,
{
    AssertUnwindSafe(fut).catch_unwind().await.unwrap_or_else(|payload| {
        Err(MqError::internal(format!("{} panicked", operation))
            .with_details(panic_message(payload.as_ref())))
    })
}

fn require_connection_id(connection_id: &str) -> MqResult<()> {
    if connection_id.trim().is_empty() {
        return Err(MqError::validation("connection id is required"));
    }
    Ok(())
}

/// Errors after which the cached session is assumed dead.
fn invalidates_session(err: &MqError) -> bool {
    matches!(err.kind(), ErrorKind::Connection | ErrorKind::Network)
}

/// One broker-neutral entry point over every configured connection.
pub struct MqService {
    config: CoreConfig,
    factory: Arc<dyn AdapterFactory>,
    cache: ConnectionCache,
    orchestrator: SubscriptionOrchestrator,
    configs: Arc<dyn ConfigStore>,
    history: Arc<dyn HistoryStore>,
}

impl MqService {
    pub fn builder() -> MqServiceBuilder {
        MqServiceBuilder::default()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    async fn resolve(&self, connection_id: &str) -> MqResult<ConnectionConfig> {
        self.configs.get_connection(connection_id).await
    }

    /// The cache bounds the connect itself, so a timed-out client is closed
    /// rather than dropped mid-handshake.
    async fn client(&self, config: &ConnectionConfig) -> MqResult<Arc<dyn Client>> {
        guarded("connect", self.cache.get_or_create(&config.id, config)).await
    }

    /// Apply the operation timeout and panic guard to an adapter call.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> MqResult<T>
    where
        F: Future<Output = MqResult<T>>,
    {
        let _timer = OperationTimer::start(operation);
        match tokio::time::timeout(self.config.operation_timeout(), guarded(operation, fut)).await {
            Ok(result) => result,
            Err(_) => Err(MqError::timeout(format!("{} timed out", operation)).with_details(
                format!("after {}", format_duration(self.config.operation_timeout())),
            )),
        }
    }

    async fn evict_if_dead(&self, connection_id: &str, err: &MqError) {
        if invalidates_session(err) {
            if let Err(e) = self.cache.close(connection_id).await {
                warn!(connection_id, error = %e, "Failed to close broken client");
            }
        }
    }

    /// Probe a connection with a throwaway admin session.
    ///
    /// Never fails. The admin is closed whatever the outcome, and latency is
    /// measured from entry.
    pub async fn test_connection(&self, connection_id: &str) -> TestResult {
        let started = Instant::now();

        let result = match self.resolve(connection_id).await {
            Ok(config) => self.probe(&config, started).await,
            Err(e) => TestResult::failed(format!("Failed to load connection config: {}", e), started),
        };

        if let Err(e) = self
            .history
            .record_test(connection_id, result.success, &result.message, result.latency_ms)
            .await
        {
            warn!(connection_id, error = %e, "Failed to record connection test");
        }
        info!(
            component = COMPONENT,
            connection_id,
            success = result.success,
            latency_ms = result.latency_ms,
            "Connection test completed"
        );
        result
    }

    async fn probe(&self, config: &ConnectionConfig, started: Instant) -> TestResult {
        let admin = match self.factory.create_admin(config.broker_type) {
            Ok(admin) => admin,
            Err(e) => {
                return TestResult::failed(format!("Failed to create admin client: {}", e), started)
            }
        };

        let connect_timeout = self.config.connect_timeout();
        let operation_timeout = self.config.operation_timeout();
        let attempt = async {
            match tokio::time::timeout(connect_timeout, admin.connect(config)).await {
                Err(_) => TestResult::failed(
                    format!("Connection failed: timed out after {}", format_duration(connect_timeout)),
                    started,
                ),
                Ok(Err(e)) => TestResult::failed(format!("Connection failed: {}", e), started),
                Ok(Ok(())) => match tokio::time::timeout(operation_timeout, admin.test_connection()).await {
                    Ok(result) => result,
                    Err(_) => TestResult::failed(
                        format!("Connection test timed out after {}", format_duration(operation_timeout)),
                        started,
                    ),
                },
            }
        };

        let result = AssertUnwindSafe(attempt).catch_unwind().await.unwrap_or_else(|payload| {
            TestResult::failed(
                format!("Connection test failed: internal fault: {}", panic_message(payload.as_ref())),
                started,
            )
        });

        if let Err(e) = admin.close().await {
            warn!(connection_id = %config.id, error = %e, "Failed to close admin after test");
        }
        result.measured_from(started)
    }

    /// Publish one message through the cached client.
    pub async fn produce(&self, request: &ProduceRequest) -> MqResult<()> {
        let started = Instant::now();
        let config = self.resolve(&request.connection_id).await?;
        let client = self.client(&config).await?;

        let result = self.bounded("produce", client.produce(request)).await;
        let latency_ms = elapsed_ms(started);
        self.finish_produce(&config, &request.topic, &result, latency_ms, 1).await;
        result
    }

    /// Publish several messages; the first failure is returned.
    pub async fn produce_batch(&self, connection_id: &str, requests: &[ProduceRequest]) -> MqResult<()> {
        let started = Instant::now();
        if requests.is_empty() {
            return Err(MqError::validation("batch must contain at least one message"));
        }
        let config = self.resolve(connection_id).await?;
        let client = self.client(&config).await?;

        let result = self.bounded("produce_batch", client.produce_batch(requests)).await;
        let latency_ms = elapsed_ms(started);
        let topic = requests[0].topic.as_str();
        self.finish_produce(&config, topic, &result, latency_ms, requests.len()).await;
        result
    }

    async fn finish_produce(
        &self,
        config: &ConnectionConfig,
        topic: &str,
        result: &MqResult<()>,
        latency_ms: u64,
        count: usize,
    ) {
        let summary = match result {
            Ok(()) if count == 1 => "Message sent successfully".to_string(),
            Ok(()) => format!("{} messages sent successfully", count),
            Err(e) => format!("Failed to send message: {}", e),
        };
        if let Err(e) = self
            .history
            .record_produce(&config.id, topic, result.is_ok(), &summary, latency_ms)
            .await
        {
            warn!(connection_id = %config.id, error = %e, "Failed to record produce");
        }
        for _ in 0..count {
            metrics::record_produce(config.broker_type.as_str(), result.is_ok());
        }
        log_operation!(COMPONENT, "produce", config.id, result, latency_ms);
        if let Err(e) = result {
            self.evict_if_dead(&config.id, e).await;
        }
    }

    /// Start a consume loop on a dedicated consumer; returns its subscription id.
    pub async fn start_consuming(&self, request: &ConsumeRequest) -> MqResult<String> {
        if request.topics.is_empty() {
            return Err(MqError::validation("at least one topic is required"));
        }
        let config = self.resolve(&request.connection_id).await?;
        let consumer = self.factory.create_consumer(config.broker_type)?;

        let result = guarded("start_consuming", self.orchestrator.start(&config, consumer, request)).await;
        match &result {
            Ok(id) => info!(
                component = COMPONENT,
                subscription_id = %id,
                connection_id = %config.id,
                "Consumer started"
            ),
            Err(e) => warn!(
                component = COMPONENT,
                connection_id = %config.id,
                error = %e,
                "Failed to start consumer"
            ),
        }
        result
    }

    /// Stop a subscription. Unknown ids are ignored.
    pub async fn stop_consuming(&self, subscription_id: &str) {
        self.orchestrator.stop(subscription_id).await;
    }

    pub async fn stop_all_consumers(&self) {
        self.orchestrator.stop_all().await;
    }

    pub fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.orchestrator.list()
    }

    pub fn active_subscription_count(&self) -> usize {
        self.orchestrator.active_count()
    }

    pub async fn list_topics(&self, connection_id: &str) -> MqResult<Vec<TopicInfo>> {
        require_connection_id(connection_id)?;
        let started = Instant::now();
        let config = self.resolve(connection_id).await?;
        let client = self.client(&config).await?;

        let result = self.bounded("list_topics", client.list_topics()).await;
        log_operation!(COMPONENT, "list_topics", connection_id, result, elapsed_ms(started));
        if let Err(e) = &result {
            self.evict_if_dead(connection_id, e).await;
        }
        result
    }

    pub async fn create_topic(&self, request: &CreateTopicRequest) -> MqResult<()> {
        require_connection_id(&request.connection_id)?;
        let started = Instant::now();
        let config = self.resolve(&request.connection_id).await?;
        let client = self.client(&config).await?;

        let result = self
            .bounded(
                "create_topic",
                client.create_topic(&request.topic, request.partitions, request.replicas),
            )
            .await;
        log_operation!(COMPONENT, "create_topic", request.connection_id, result, elapsed_ms(started));
        if let Err(e) = &result {
            self.evict_if_dead(&request.connection_id, e).await;
        }
        result
    }

    pub async fn delete_topic(&self, request: &DeleteTopicRequest) -> MqResult<()> {
        require_connection_id(&request.connection_id)?;
        let started = Instant::now();
        let config = self.resolve(&request.connection_id).await?;
        let client = self.client(&config).await?;

        let result = self.bounded("delete_topic", client.delete_topic(&request.topic)).await;
        log_operation!(COMPONENT, "delete_topic", request.connection_id, result, elapsed_ms(started));
        if let Err(e) = &result {
            self.evict_if_dead(&request.connection_id, e).await;
        }
        result
    }

    pub async fn list_consumer_groups(&self, connection_id: &str) -> MqResult<Vec<ConsumerGroup>> {
        require_connection_id(connection_id)?;
        let started = Instant::now();
        let config = self.resolve(connection_id).await?;
        let client = self.client(&config).await?;

        let result = self.bounded("list_consumer_groups", client.list_consumer_groups()).await;
        log_operation!(COMPONENT, "list_consumer_groups", connection_id, result, elapsed_ms(started));
        result
    }

    /// Close and forget the cached client for a connection.
    pub async fn close_connection(&self, connection_id: &str) -> MqResult<()> {
        self.cache.close(connection_id).await
    }

    /// Stop every consumer, then close every cached client.
    pub async fn shutdown(&self) {
        info!(component = COMPONENT, "Shutting down messaging service");
        self.orchestrator.stop_all().await;
        self.cache.close_all().await;
        info!(component = COMPONENT, "Messaging service shut down");
    }
}

/// Builder for [`MqService`]. Unset collaborators default to in-memory or
/// no-op implementations.
#[derive(Default)]
pub struct MqServiceBuilder {
    config: CoreConfig,
    factory: Option<Arc<dyn AdapterFactory>>,
    configs: Option<Arc<dyn ConfigStore>>,
    history: Option<Arc<dyn HistoryStore>>,
    events: Option<Arc<dyn EventSink>>,
}

impl MqServiceBuilder {
    #[must_use]
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    #[must_use]
    pub fn config_store(mut self, configs: Arc<dyn ConfigStore>) -> Self {
        self.configs = Some(configs);
        self
    }

    #[must_use]
    pub fn history_store(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    #[must_use]
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> MqResult<MqService> {
        self.config.validate()?;

        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(DefaultAdapterFactory));
        let configs = self
            .configs
            .unwrap_or_else(|| Arc::new(InMemoryConfigStore::new()));
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(InMemoryHistoryStore::new(self.config.history_capacity)));
        let events = self.events.unwrap_or_else(|| Arc::new(NoopEventSink));

        let orchestrator = SubscriptionOrchestrator::new(
            events,
            history.clone(),
            self.config.connect_timeout(),
            self.config.stop_grace(),
        );

        Ok(MqService {
            cache: ConnectionCache::new(factory.clone())
                .with_connect_timeout(self.config.connect_timeout()),
            config: self.config,
            factory,
            orchestrator,
            configs,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::outbound::mocks::{MockConfigStore, MockHistoryStore, RecordingSink};
    use crate::testing::{MockFactory, MockPlan};
    use shared_types::{BrokerType, HistoryKind};
    use std::time::Duration;

    struct Fixture {
        service: MqService,
        factory: Arc<MockFactory>,
        history: Arc<MockHistoryStore>,
        sink: Arc<RecordingSink>,
    }

    fn fixture(plan: MockPlan) -> Fixture {
        let factory = Arc::new(MockFactory::new(plan));
        let history = Arc::new(MockHistoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let config = ConnectionConfig::new("mock", BrokerType::RabbitMq, "localhost", 5672).with_id("c1");
        let service = MqService::builder()
            .factory(factory.clone())
            .config_store(Arc::new(MockConfigStore::with(config)))
            .history_store(history.clone())
            .event_sink(sink.clone())
            .build()
            .unwrap();
        Fixture {
            service,
            factory,
            history,
            sink,
        }
    }

    #[tokio::test]
    async fn test_slow_connect_times_out_and_closes_client() {
        let factory = Arc::new(MockFactory::new(MockPlan {
            connect_delay: Some(Duration::from_millis(300)),
            ..MockPlan::default()
        }));
        let config = ConnectionConfig::new("mock", BrokerType::Kafka, "localhost", 9092).with_id("c1");
        let service = MqService::builder()
            .config(CoreConfig {
                connect_timeout_ms: 50,
                ..CoreConfig::default()
            })
            .factory(factory.clone())
            .config_store(Arc::new(MockConfigStore::with(config)))
            .build()
            .unwrap();

        let err = service
            .produce(&ProduceRequest::new("c1", "orders").value("x"))
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Timeout));
        assert_eq!(factory.created().len(), 1);
        assert_eq!(factory.last_created().unwrap().close_calls(), 1);
    }

    #[tokio::test]
    async fn test_connection_success_is_recorded() {
        let fx = fixture(MockPlan::default());
        let result = fx.service.test_connection("c1").await;

        assert!(result.success);
        assert_eq!(fx.history.count(HistoryKind::TestConnection), 1);
        assert_eq!(fx.factory.last_created().unwrap().close_calls(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_never_errors() {
        let fx = fixture(MockPlan {
            fail_connect: true,
            ..MockPlan::default()
        });
        let result = fx.service.test_connection("c1").await;

        assert!(!result.success);
        assert!(result.message.starts_with("Connection failed:"));
        assert_eq!(fx.factory.last_created().unwrap().close_calls(), 1);
    }

    #[tokio::test]
    async fn test_connection_panic_becomes_failed_result() {
        let fx = fixture(MockPlan {
            panic_on_test: true,
            ..MockPlan::default()
        });
        let result = fx.service.test_connection("c1").await;

        assert!(!result.success);
        assert!(result.message.contains("internal fault"));
        assert_eq!(fx.factory.last_created().unwrap().close_calls(), 1);
    }

    #[tokio::test]
    async fn test_connection_unknown_id() {
        let fx = fixture(MockPlan::default());
        let result = fx.service.test_connection("missing").await;
        assert!(!result.success);
        assert!(fx.factory.created().is_empty());
    }

    #[tokio::test]
    async fn test_produce_reuses_cached_client_and_records() {
        let fx = fixture(MockPlan::default());
        let request = ProduceRequest::new("c1", "orders").value("a");

        fx.service.produce(&request).await.unwrap();
        fx.service.produce(&request).await.unwrap();

        assert_eq!(fx.factory.created().len(), 1);
        assert_eq!(fx.factory.last_created().unwrap().produce_calls(), 2);
        assert_eq!(fx.history.count(HistoryKind::Produce), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected_before_connecting() {
        let fx = fixture(MockPlan::default());
        let err = fx.service.produce_batch("c1", &[]).await.unwrap_err();

        assert!(err.is_kind(ErrorKind::Validation));
        assert!(fx.factory.created().is_empty());
    }

    #[tokio::test]
    async fn test_admin_ops_require_connection_id() {
        let fx = fixture(MockPlan::default());
        let err = fx.service.list_topics("").await.unwrap_err();
        assert!(err.is_kind(ErrorKind::Validation));

        let err = fx
            .service
            .create_topic(&CreateTopicRequest::new("", "orders"))
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_topic_admin_roundtrip() {
        let fx = fixture(MockPlan::default());
        fx.service
            .create_topic(&CreateTopicRequest::new("c1", "orders"))
            .await
            .unwrap();
        let topics = fx.service.list_topics("c1").await.unwrap();
        assert_eq!(topics, vec![TopicInfo::new("orders", 1, 1)]);

        fx.service
            .delete_topic(&DeleteTopicRequest::new("c1", "orders"))
            .await
            .unwrap();
        let err = fx
            .service
            .delete_topic(&DeleteTopicRequest::new("c1", "orders"))
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_consume_end_to_end_then_stop() {
        let fx = fixture(MockPlan::default());
        let id = fx
            .service
            .start_consuming(&ConsumeRequest::new("c1", ["orders"]).group_id("g1"))
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert_eq!(fx.service.active_subscription_count(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        fx.service
            .produce(&ProduceRequest::new("c1", "orders").value("hi"))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while fx.sink.names().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        fx.service.stop_consuming(&id).await;
        assert_eq!(fx.service.active_subscription_count(), 0);
        // Consumer is the first adapter created; the cached client is the second.
        assert_eq!(fx.factory.created()[0].close_calls(), 1);

        fx.service
            .produce(&ProduceRequest::new("c1", "orders").value("late"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fx.sink.names().len(), 1);
    }

    #[tokio::test]
    async fn test_start_consuming_requires_topics() {
        let fx = fixture(MockPlan::default());
        let err = fx
            .service
            .start_consuming(&ConsumeRequest::new("c1", Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Validation));
        assert!(fx.factory.created().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let fx = fixture(MockPlan::default());
        fx.service
            .start_consuming(&ConsumeRequest::new("c1", ["orders"]))
            .await
            .unwrap();
        fx.service
            .produce(&ProduceRequest::new("c1", "orders"))
            .await
            .unwrap();

        fx.service.shutdown().await;
        assert_eq!(fx.service.active_subscription_count(), 0);
        assert!(fx.factory.created().iter().all(|a| a.close_calls() == 1));
    }
}
