//! # Unreachable Brokers
//!
//! The real adapters pointed at ports nobody listens on. Probes degrade to a
//! failed result, other operations fail fast and leave nothing cached.

#[cfg(test)]
mod tests {
    use super::super::connection;
    use mq_core::{CoreConfig, InMemoryConfigStore, MqService};
    use shared_types::{BrokerType, ConsumeRequest, ErrorKind, ProduceRequest};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn service() -> MqService {
        let store = InMemoryConfigStore::with_connections([
            connection("rabbit", BrokerType::RabbitMq, "localhost", 9999),
            connection("rocket", BrokerType::RocketMq, "127.0.0.1", 1),
            connection("kafka", BrokerType::Kafka, "127.0.0.1", 1),
        ])
        .unwrap();
        let config = CoreConfig {
            connect_timeout_ms: 3_000,
            operation_timeout_ms: 3_000,
            ..CoreConfig::default()
        };
        MqService::builder()
            .config(config)
            .config_store(Arc::new(store))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_rabbitmq_probe_fails_gracefully() {
        let svc = service();
        let result = svc.test_connection("rabbit").await;
        assert!(!result.success);
        assert!(
            result.message.to_lowercase().contains("connect"),
            "unexpected message: {}",
            result.message
        );
    }

    #[tokio::test]
    async fn test_every_family_probe_is_bounded() {
        let svc = service();
        for id in ["rabbit", "rocket", "kafka"] {
            let started = Instant::now();
            let result = svc.test_connection(id).await;
            assert!(!result.success, "{} unexpectedly reachable", id);
            assert!(started.elapsed() < Duration::from_secs(10));
        }
    }

    #[tokio::test]
    async fn test_produce_to_unreachable_broker_is_not_cached() {
        let svc = service();
        for id in ["rabbit", "rocket"] {
            let err = svc
                .produce(&ProduceRequest::new(id, "orders").value("x"))
                .await
                .unwrap_err();
            assert!(
                err.is_kind(ErrorKind::Connection) || err.is_kind(ErrorKind::Network),
                "{}: {}",
                id,
                err
            );
        }
        // A second attempt builds a fresh client and fails the same way.
        assert!(svc
            .produce(&ProduceRequest::new("rabbit", "orders"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_consume_from_unreachable_broker_leaves_no_subscription() {
        let svc = service();
        for id in ["rabbit", "rocket"] {
            let result = svc
                .start_consuming(&ConsumeRequest::new(id, ["orders"]).group_id("g1"))
                .await;
            assert!(result.is_err());
        }
        assert_eq!(svc.active_subscription_count(), 0);
        svc.shutdown().await;
    }
}
