use super::errors::map_kafka_error;
use super::settings::KafkaSettings;
use super::FAMILY;
use crate::adapters::{ensure_broker_type, not_connected, validate_batch, validate_topic};
use crate::ports::{Lifecycle, Producer};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use shared_types::{BrokerType, ConnectionConfig, MqError, MqResult, ProduceRequest};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a record may wait for room in the local queue.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Producer over `FutureProducer`. librdkafka batches by `linger.ms` and
/// `batch.num.messages`; creating it opens no socket.
#[derive(Default)]
pub struct KafkaProducer {
    producer: RwLock<Option<FutureProducer>>,
}

impl KafkaProducer {
    fn handle(&self) -> MqResult<FutureProducer> {
        self.producer.read().clone().ok_or_else(|| not_connected(FAMILY))
    }
}

fn headers(request: &ProduceRequest) -> OwnedHeaders {
    request
        .headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(request.headers.len()), |acc, (k, v)| {
            acc.insert(Header {
                key: k,
                value: Some(v.as_bytes()),
            })
        })
}

async fn send_one(producer: &FutureProducer, request: &ProduceRequest) -> MqResult<()> {
    let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&request.topic)
        .payload(request.value.as_bytes())
        .timestamp(Utc::now().timestamp_millis())
        .headers(headers(request));
    if !request.key.is_empty() {
        record = record.key(request.key.as_bytes());
    }
    if let Some(partition) = request.partition {
        record = record.partition(partition);
    }

    match producer.send(record, QUEUE_TIMEOUT).await {
        Ok((partition, offset)) => {
            debug!(topic = %request.topic, partition, offset, "Delivered message");
            Ok(())
        }
        Err((e, _)) => Err(map_kafka_error("failed to send message", &e)),
    }
}

#[async_trait]
impl Lifecycle for KafkaProducer {
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()> {
        ensure_broker_type(config, BrokerType::Kafka)?;
        let settings = KafkaSettings::from_config(config)?;
        let producer: FutureProducer = settings
            .producer_config()
            .create()
            .map_err(|e| map_kafka_error("failed to create producer", &e))?;
        *self.producer.write() = Some(producer);
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        let Some(producer) = self.producer.write().take() else {
            return Ok(());
        };
        let flushed = tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|e| MqError::internal("producer flush task failed").with_details(e.to_string()))?;
        if let Err(e) = flushed {
            warn!(error = %e, "Producer closed with undelivered messages");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.producer.read().is_some()
    }
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn produce(&self, request: &ProduceRequest) -> MqResult<()> {
        validate_topic(&request.topic)?;
        let producer = self.handle()?;
        send_one(&producer, request).await
    }

    /// Enqueues every record at once, then waits for all delivery reports.
    async fn produce_batch(&self, requests: &[ProduceRequest]) -> MqResult<()> {
        validate_batch(requests)?;
        let producer = self.handle()?;
        join_all(requests.iter().map(|r| send_one(&producer, r)))
            .await
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ErrorKind;

    #[tokio::test]
    async fn test_produce_requires_connect() {
        let producer = KafkaProducer::default();
        let err = producer
            .produce(&ProduceRequest::new("c", "orders"))
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Connection));
    }

    #[tokio::test]
    async fn test_empty_batch_before_anything_else() {
        let producer = KafkaProducer::default();
        let err = producer.produce_batch(&[]).await.unwrap_err();
        assert!(err.is_kind(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_rejects_other_broker_type() {
        let producer = KafkaProducer::default();
        let cfg = ConnectionConfig::new("r", BrokerType::RabbitMq, "localhost", 5672);
        assert!(producer.connect(&cfg).await.unwrap_err().is_kind(ErrorKind::Validation));
        assert!(!producer.is_connected());
    }

    #[tokio::test]
    async fn test_connect_is_lazy_and_close_idempotent() {
        let producer = KafkaProducer::default();
        let cfg = ConnectionConfig::new("k", BrokerType::Kafka, "127.0.0.1", 1);
        producer.connect(&cfg).await.unwrap();
        assert!(producer.is_connected());

        producer.close().await.unwrap();
        producer.close().await.unwrap();
        assert!(!producer.is_connected());
    }

    #[test]
    fn test_headers_mapped() {
        use rdkafka::message::Headers;
        let request = ProduceRequest::new("c", "orders").header("trace", "abc");
        let h = headers(&request);
        assert_eq!(h.count(), 1);
        let header = h.get(0);
        assert_eq!(header.key, "trace");
        assert_eq!(header.value, Some(&b"abc"[..]));
    }
}
