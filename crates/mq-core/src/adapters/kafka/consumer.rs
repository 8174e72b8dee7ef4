use super::errors::{is_fatal_consume_error, map_kafka_error};
use super::settings::KafkaSettings;
use super::FAMILY;
use crate::adapters::{ensure_broker_type, lossy, not_connected, validate_topics};
use crate::ports::{Consumer, Lifecycle, MessageHandler};
use async_trait::async_trait;
use parking_lot::RwLock;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message as _};
use shared_types::{BrokerType, ConnectionConfig, ConsumeRequest, Message, MqError, MqResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a transient receive error.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Default)]
struct State {
    config: Option<ConnectionConfig>,
    consumer: Option<Arc<StreamConsumer>>,
}

/// Group consumer over `StreamConsumer`, reading one topic.
///
/// Connecting only validates and stores the config; the native consumer is
/// created at subscribe time once the group and start position are known.
#[derive(Default)]
pub struct KafkaConsumer {
    state: RwLock<State>,
}

pub(crate) fn to_message(msg: &BorrowedMessage<'_>) -> Message {
    let mut headers = HashMap::new();
    if let Some(native) = msg.headers() {
        for header in native.iter() {
            headers.insert(header.key.to_string(), lossy(header.value));
        }
    }

    let mut builder = Message::builder(msg.topic())
        .key(lossy(msg.key()))
        .value(lossy(msg.payload()))
        .headers(headers)
        .partition(msg.partition())
        .offset(msg.offset());
    if let Some(millis) = msg.timestamp().to_millis() {
        builder = builder.timestamp_millis(millis);
    }
    builder.build()
}

#[async_trait]
impl Lifecycle for KafkaConsumer {
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()> {
        ensure_broker_type(config, BrokerType::Kafka)?;
        KafkaSettings::from_config(config)?;
        self.state.write().config = Some(config.clone());
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        let consumer = {
            let mut state = self.state.write();
            state.config = None;
            state.consumer.take()
        };
        if let Some(consumer) = consumer {
            consumer.unsubscribe();
            debug!("Kafka consumer unsubscribed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.read().config.is_some()
    }
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn subscribe(&self, request: &ConsumeRequest) -> MqResult<()> {
        validate_topics(&request.topics)?;
        let config = self
            .state
            .read()
            .config
            .clone()
            .ok_or_else(|| not_connected(FAMILY))?;

        let topic = request.topics[0].clone();
        if request.topics.len() > 1 {
            warn!(
                topic = %topic,
                ignored = ?&request.topics[1..],
                "Kafka consumer reads a single topic; extra topics ignored"
            );
        }

        let group_id = request.resolve_group_id(&config);
        let settings = KafkaSettings::from_config(&config)?;
        let consumer: StreamConsumer = settings
            .consumer_config(&group_id, request.from_beginning, request.auto_commit)
            .create()
            .map_err(|e| map_kafka_error("failed to create consumer", &e))?;
        consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| MqError::subscription("failed to subscribe").with_details(e.to_string()))?;

        info!(topic = %topic, group_id = %group_id, "Kafka consumer subscribed");
        self.state.write().consumer = Some(Arc::new(consumer));
        Ok(())
    }

    async fn consume(&self, cancel: CancellationToken, handler: MessageHandler) -> MqResult<()> {
        let consumer = {
            let state = self.state.read();
            if state.config.is_none() {
                return Err(not_connected(FAMILY));
            }
            state.consumer.clone().ok_or_else(|| {
                MqError::subscription("consumer not subscribed to any topic")
            })?
        };

        loop {
            let message = {
                let received = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    received = consumer.recv() => received.map(|borrowed| to_message(&borrowed)),
                };
                match received {
                    Ok(message) => message,
                    Err(e) if is_fatal_consume_error(&e) => {
                        return Err(map_kafka_error("failed to read message", &e));
                    }
                    Err(e) => {
                        warn!(error = %e, "Transient Kafka receive error");
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                        }
                        continue;
                    }
                }
            };

            if let Err(e) = handler(message).await {
                warn!(error = %e, "Message handler failed");
            }
        }
    }
}
