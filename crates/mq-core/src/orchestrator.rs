//! Subscription orchestrator: runs, tracks and tears down consume loops.
//!
//! Each subscription goes `created → running → (stopped | failed)`. The
//! record is inserted before its task is spawned, and whoever removes it from
//! the map (an explicit stop or the task itself on exit) is the one that
//! closes the consumer, so a consumer is closed exactly once no matter how
//! stop calls and loop exits interleave.

use crate::ports::{handler_fn, Consumer, EventSink, HistoryStore, MessageHandler};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use mq_telemetry::{log_event, metrics};
use serde::Serialize;
use shared_bus::MqEvent;
use shared_types::utils::truncate;
use shared_types::{
    generate_id, BrokerType, ConnectionConfig, ConsumeRequest, MqError, MqResult,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error texts that broker clients use for a clean, broker-initiated close.
/// Consulted only when neither the token nor the error's own flag decides.
const NORMAL_SHUTDOWN_MARKERS: [&str; 3] = [
    "connection closed",
    "use of closed network connection",
    "CONNECTION_FORCED",
];

/// Longest message value echoed into a history record.
const HISTORY_PREVIEW_CHARS: usize = 100;

const COMPONENT: &str = "orchestrator";

struct Subscription {
    connection_id: String,
    broker_type: BrokerType,
    topics: Vec<String>,
    cancel: CancellationToken,
    consumer: Arc<dyn Consumer>,
    started_at: DateTime<Utc>,
    task: Option<JoinHandle<()>>,
}

/// Read-only view of a running subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub id: String,
    pub connection_id: String,
    pub broker_type: BrokerType,
    pub topics: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// How a consume loop ended.
#[derive(Debug)]
enum LoopOutcome {
    Stopped,
    Failed(MqError),
}

/// Decide whether a finished loop was a normal shutdown.
///
/// The token wins: anything returned after cancellation is a stop. Then the
/// adapter's typed peer-closed flag, then the native-text markers.
fn classify(cancelled: bool, result: MqResult<()>) -> LoopOutcome {
    match result {
        Ok(()) => LoopOutcome::Stopped,
        Err(_) if cancelled => LoopOutcome::Stopped,
        Err(e) if e.is_peer_closed() => LoopOutcome::Stopped,
        Err(e) => {
            let text = e.to_string();
            if NORMAL_SHUTDOWN_MARKERS.iter().any(|m| text.contains(m)) {
                LoopOutcome::Stopped
            } else {
                LoopOutcome::Failed(e)
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

type SubscriptionMap = DashMap<String, Subscription>;

/// Owns every running consume loop.
pub struct SubscriptionOrchestrator {
    subscriptions: Arc<SubscriptionMap>,
    events: Arc<dyn EventSink>,
    history: Arc<dyn HistoryStore>,
    connect_timeout: Duration,
    stop_grace: Duration,
}

impl SubscriptionOrchestrator {
    pub fn new(
        events: Arc<dyn EventSink>,
        history: Arc<dyn HistoryStore>,
        connect_timeout: Duration,
        stop_grace: Duration,
    ) -> Self {
        Self {
            subscriptions: Arc::new(DashMap::new()),
            events,
            history,
            connect_timeout,
            stop_grace,
        }
    }

    /// Connect and subscribe `consumer`, then run its loop in a new task.
    ///
    /// Returns the fresh subscription id. When connect or subscribe fails the
    /// consumer is closed and no record is created.
    pub async fn start(
        &self,
        config: &ConnectionConfig,
        consumer: Arc<dyn Consumer>,
        request: &ConsumeRequest,
    ) -> MqResult<String> {
        if let Err(e) = self.prepare(config, consumer.as_ref(), request).await {
            if let Err(close_err) = consumer.close().await {
                warn!(error = %close_err, "Failed to close consumer after failed start");
            }
            return Err(e);
        }

        let id = generate_id();
        let cancel = CancellationToken::new();
        self.subscriptions.insert(
            id.clone(),
            Subscription {
                connection_id: request.connection_id.clone(),
                broker_type: config.broker_type,
                topics: request.topics.clone(),
                cancel: cancel.clone(),
                consumer: consumer.clone(),
                started_at: Utc::now(),
                task: None,
            },
        );
        metrics::set_active_subscriptions(self.subscriptions.len());

        let handler = relay_handler(
            id.clone(),
            request.connection_id.clone(),
            config.broker_type,
            self.events.clone(),
            self.history.clone(),
        );
        let task = tokio::spawn(run_loop(
            id.clone(),
            consumer,
            cancel,
            handler,
            self.subscriptions.clone(),
            self.events.clone(),
        ));

        // The loop may already have finished and removed its own record.
        if let Some(mut record) = self.subscriptions.get_mut(&id) {
            record.task = Some(task);
        }

        log_event!(
            info,
            COMPONENT,
            "Subscription started",
            subscription_id = %id,
            connection_id = %request.connection_id,
            topics = ?request.topics
        );
        Ok(id)
    }

    async fn prepare(
        &self,
        config: &ConnectionConfig,
        consumer: &dyn Consumer,
        request: &ConsumeRequest,
    ) -> MqResult<()> {
        tokio::time::timeout(self.connect_timeout, consumer.connect(config))
            .await
            .map_err(|_| {
                MqError::timeout("consumer connect timed out").with_details(config.address())
            })??;
        consumer.subscribe(request).await
    }

    /// Cancel the loop, wait for it, close its consumer and drop the record.
    ///
    /// Unknown or already-stopped ids are a no-op. Returns whether this call
    /// did the stopping.
    pub async fn stop(&self, id: &str) -> bool {
        let Some((_, mut record)) = self.subscriptions.remove(id) else {
            debug!(subscription_id = id, "Stop ignored for inactive subscription");
            return false;
        };
        metrics::set_active_subscriptions(self.subscriptions.len());

        record.cancel.cancel();
        if let Some(task) = record.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.stop_grace, task).await.is_err() {
                warn!(subscription_id = id, "Consume loop ignored cancellation; aborting");
                abort.abort();
            }
        }

        if let Err(e) = record.consumer.close().await {
            warn!(subscription_id = id, error = %e, "Failed to close consumer");
        }
        log_event!(
            info,
            COMPONENT,
            "Subscription stopped",
            subscription_id = id,
            connection_id = %record.connection_id
        );
        true
    }

    /// Stop every tracked subscription concurrently.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "Stopping all subscriptions");
        futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;
    }

    pub fn list(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .subscriptions
            .iter()
            .map(|entry| SubscriptionInfo {
                id: entry.key().clone(),
                connection_id: entry.connection_id.clone(),
                broker_type: entry.broker_type,
                topics: entry.topics.clone(),
                started_at: entry.started_at,
            })
            .collect();
        infos.sort_by_key(|i| i.started_at);
        infos
    }

    pub fn active_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.subscriptions.contains_key(id)
    }
}

/// Forward each message to the event sink, then record it in history.
fn relay_handler(
    subscription_id: String,
    connection_id: String,
    broker: BrokerType,
    events: Arc<dyn EventSink>,
    history: Arc<dyn HistoryStore>,
) -> MessageHandler {
    handler_fn(move |message| {
        let subscription_id = subscription_id.clone();
        let connection_id = connection_id.clone();
        let events = events.clone();
        let history = history.clone();
        async move {
            let topic = message.topic().to_string();
            let summary = format!(
                "Consumed message: {}",
                truncate(message.value(), HISTORY_PREVIEW_CHARS)
            );

            events
                .emit(MqEvent::message_received(subscription_id, message))
                .await;
            if let Err(e) = history
                .record_consume(&connection_id, &topic, true, &summary, 0)
                .await
            {
                warn!(connection_id = %connection_id, error = %e, "Failed to record consumed message");
            }
            metrics::record_consumed(broker.as_str());
            Ok(())
        }
    })
}

async fn run_loop(
    id: String,
    consumer: Arc<dyn Consumer>,
    cancel: CancellationToken,
    handler: MessageHandler,
    subscriptions: Arc<SubscriptionMap>,
    events: Arc<dyn EventSink>,
) {
    debug!(subscription_id = %id, "Consume loop running");

    let result = AssertUnwindSafe(consumer.consume(cancel.clone(), handler))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(MqError::internal("consume loop panicked")
                .with_details(panic_message(payload.as_ref())))
        });

    match classify(cancel.is_cancelled(), result) {
        LoopOutcome::Stopped => {
            debug!(subscription_id = %id, "Consume loop ended normally");
        }
        LoopOutcome::Failed(e) => {
            error!(subscription_id = %id, error = %e, "Consume loop failed");
            metrics::record_consumer_error();
            events
                .emit(MqEvent::consumer_error(id.clone(), e.to_string()))
                .await;
        }
    }

    if let Some((_, record)) = subscriptions.remove(&id) {
        metrics::set_active_subscriptions(subscriptions.len());
        if let Err(e) = record.consumer.close().await {
            warn!(subscription_id = %id, error = %e, "Failed to close consumer");
        }
        info!(subscription_id = %id, "Subscription ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::outbound::mocks::{MockHistoryStore, RecordingSink};
    use crate::ports::{Lifecycle, Producer};
    use crate::testing::{ConsumeScript, MockAdapter, MockBroker, MockPlan};
    use shared_types::{ErrorKind, HistoryKind, ProduceRequest};

    struct Fixture {
        orchestrator: SubscriptionOrchestrator,
        broker: Arc<MockBroker>,
        sink: Arc<RecordingSink>,
        history: Arc<MockHistoryStore>,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(RecordingSink::default());
        let history = Arc::new(MockHistoryStore::default());
        Fixture {
            orchestrator: SubscriptionOrchestrator::new(
                sink.clone(),
                history.clone(),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ),
            broker: Arc::new(MockBroker::default()),
            sink,
            history,
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("mock", BrokerType::RabbitMq, "localhost", 5672).with_id("c1")
    }

    fn request() -> ConsumeRequest {
        ConsumeRequest::new("c1", ["orders"])
    }

    impl Fixture {
        fn adapter(&self, consume: ConsumeScript) -> Arc<MockAdapter> {
            Arc::new(MockAdapter::new(
                self.broker.clone(),
                MockPlan {
                    consume,
                    ..MockPlan::default()
                },
            ))
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_classify_prefers_token() {
        let err = Err(MqError::network("read failed"));
        assert!(matches!(classify(true, err), LoopOutcome::Stopped));
    }

    #[test]
    fn test_classify_peer_closed_and_markers() {
        let flagged = Err(MqError::network("bye").peer_closed());
        assert!(matches!(classify(false, flagged), LoopOutcome::Stopped));

        let forced = Err(MqError::network("channel error").with_details("CONNECTION_FORCED - shutdown"));
        assert!(matches!(classify(false, forced), LoopOutcome::Stopped));

        let real = Err(MqError::auth("ACCESS_REFUSED"));
        assert!(matches!(classify(false, real), LoopOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_messages_relayed_to_sink_and_history() {
        let fx = fixture();
        let consumer = fx.adapter(ConsumeScript::UntilCancelled);
        let id = fx
            .orchestrator
            .start(&config(), consumer.clone(), &request())
            .await
            .unwrap();
        assert!(fx.orchestrator.contains(&id));

        // Give the loop a chance to attach to the broker before publishing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        consumer
            .produce(&ProduceRequest::new("c1", "orders").value("hello"))
            .await
            .unwrap();

        wait_until(|| fx.history.count(HistoryKind::Consume) == 1).await;
        assert_eq!(fx.sink.names(), vec![shared_bus::MESSAGE_RECEIVED]);
        let records = fx.history.records.lock().clone();
        assert_eq!(records[0].3, "Consumed message: hello");

        assert!(fx.orchestrator.stop(&id).await);
        assert_eq!(consumer.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_once() {
        let fx = fixture();
        let consumer = fx.adapter(ConsumeScript::UntilCancelled);
        let id = fx
            .orchestrator
            .start(&config(), consumer.clone(), &request())
            .await
            .unwrap();

        let (a, b) = tokio::join!(fx.orchestrator.stop(&id), fx.orchestrator.stop(&id));
        assert!(a ^ b);
        assert!(!fx.orchestrator.stop(&id).await);
        assert!(!fx.orchestrator.stop("never-existed").await);

        assert_eq!(consumer.close_calls(), 1);
        assert_eq!(fx.orchestrator.active_count(), 0);
        assert!(fx.sink.names().is_empty());
    }

    #[tokio::test]
    async fn test_failed_loop_emits_error_and_removes_record() {
        let fx = fixture();
        let consumer = fx.adapter(ConsumeScript::Fail("ACCESS_REFUSED".into()));
        let id = fx
            .orchestrator
            .start(&config(), consumer.clone(), &request())
            .await
            .unwrap();

        wait_until(|| !fx.orchestrator.contains(&id)).await;
        wait_until(|| consumer.close_calls() == 1).await;
        assert_eq!(fx.sink.names(), vec![shared_bus::CONSUMER_ERROR]);
        assert_eq!(fx.sink.events.lock()[0].subscription_id(), id);
    }

    #[tokio::test]
    async fn test_peer_close_is_silent() {
        let fx = fixture();
        let consumer = fx.adapter(ConsumeScript::PeerClosed);
        let id = fx
            .orchestrator
            .start(&config(), consumer.clone(), &request())
            .await
            .unwrap();

        wait_until(|| !fx.orchestrator.contains(&id)).await;
        wait_until(|| consumer.close_calls() == 1).await;
        assert!(fx.sink.names().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_loop_is_reported() {
        let fx = fixture();
        let consumer = fx.adapter(ConsumeScript::Panic);
        let id = fx
            .orchestrator
            .start(&config(), consumer.clone(), &request())
            .await
            .unwrap();

        wait_until(|| fx.sink.names() == vec![shared_bus::CONSUMER_ERROR]).await;
        wait_until(|| !fx.orchestrator.contains(&id)).await;
        let payload = fx.sink.events.lock()[0].payload();
        assert!(payload["error"].as_str().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_no_record() {
        let fx = fixture();
        let consumer = Arc::new(MockAdapter::new(
            fx.broker.clone(),
            MockPlan {
                fail_subscribe: true,
                ..MockPlan::default()
            },
        ));

        let err = fx
            .orchestrator
            .start(&config(), consumer.clone(), &request())
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Subscription));
        assert_eq!(fx.orchestrator.active_count(), 0);
        assert_eq!(consumer.close_calls(), 1);
        assert!(!consumer.is_connected());
    }

    #[tokio::test]
    async fn test_stop_all_and_unique_ids() {
        let fx = fixture();
        let mut consumers = Vec::new();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..5 {
            let consumer = fx.adapter(ConsumeScript::UntilCancelled);
            let id = fx
                .orchestrator
                .start(&config(), consumer.clone(), &request())
                .await
                .unwrap();
            assert!(ids.insert(id));
            consumers.push(consumer);
        }
        assert_eq!(fx.orchestrator.list().len(), 5);

        let first = fx.orchestrator.list()[0].id.clone();
        let (_, _) = tokio::join!(fx.orchestrator.stop_all(), fx.orchestrator.stop(&first));

        assert_eq!(fx.orchestrator.active_count(), 0);
        assert!(consumers.iter().all(|c| c.close_calls() == 1));
    }
}
