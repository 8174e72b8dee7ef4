//! # Connection Cache
//!
//! Concurrent callers for one id share a single connected client; stale and
//! half-built clients are closed.

#[cfg(test)]
mod tests {
    use super::super::connection;
    use futures::future::join_all;
    use mq_core::testing::{MockFactory, MockPlan};
    use mq_core::{Client, ConnectionCache, Lifecycle};
    use shared_types::BrokerType;
    use std::sync::Arc;
    use std::time::Duration;

    fn addr(client: &Arc<dyn Client>) -> *const () {
        Arc::as_ptr(client) as *const ()
    }

    fn slow_factory() -> Arc<MockFactory> {
        Arc::new(MockFactory::new(MockPlan {
            connect_delay: Some(Duration::from_millis(20)),
            ..MockPlan::default()
        }))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_client() {
        let factory = slow_factory();
        let cache = Arc::new(ConnectionCache::new(factory.clone()));
        let config = connection("c1", BrokerType::Kafka, "localhost", 9092);

        let calls = (0..16).map(|_| {
            let cache = cache.clone();
            let config = config.clone();
            tokio::spawn(async move { cache.get_or_create("c1", &config).await.unwrap() })
        });
        let clients: Vec<Arc<dyn Client>> = join_all(calls).await.into_iter().map(|r| r.unwrap()).collect();

        let first = addr(&clients[0]);
        assert!(clients.iter().all(|c| addr(c) == first));
        assert_eq!(factory.created().len(), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_ids_are_isolated() {
        let factory = Arc::new(MockFactory::default());
        let cache = ConnectionCache::new(factory.clone());
        let a = cache
            .get_or_create("a", &connection("a", BrokerType::Kafka, "h", 1))
            .await
            .unwrap();
        let b = cache
            .get_or_create("b", &connection("b", BrokerType::RabbitMq, "h", 2))
            .await
            .unwrap();
        assert_ne!(addr(&a), addr(&b));
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_disconnected_client_is_replaced_and_closed() {
        let factory = Arc::new(MockFactory::default());
        let cache = ConnectionCache::new(factory.clone());
        let config = connection("c1", BrokerType::Kafka, "localhost", 9092);

        let first = cache.get_or_create("c1", &config).await.unwrap();
        let stale = factory.last_created().unwrap();
        stale.disconnect();

        let second = cache.get_or_create("c1", &config).await.unwrap();
        assert_ne!(addr(&first), addr(&second));
        assert_eq!(stale.close_calls(), 1);
        assert_eq!(factory.created().len(), 2);
        assert!(second.is_connected());
    }

    #[tokio::test]
    async fn test_failed_connect_is_closed_and_not_cached() {
        let factory = Arc::new(MockFactory::new(MockPlan {
            fail_connect: true,
            ..MockPlan::default()
        }));
        let cache = ConnectionCache::new(factory.clone());
        let config = connection("c1", BrokerType::Kafka, "localhost", 9092);

        assert!(cache.get_or_create("c1", &config).await.is_err());
        assert!(!cache.contains("c1").await);
        assert_eq!(factory.last_created().unwrap().close_calls(), 1);

        factory.set_plan(MockPlan::default());
        assert!(cache.get_or_create("c1", &config).await.is_ok());
        assert!(cache.contains("c1").await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let factory = Arc::new(MockFactory::default());
        let cache = ConnectionCache::new(factory.clone());
        let config = connection("c1", BrokerType::Kafka, "localhost", 9092);
        cache.get_or_create("c1", &config).await.unwrap();

        cache.close("c1").await.unwrap();
        cache.close("c1").await.unwrap();
        assert!(cache.is_empty().await);
        assert_eq!(factory.last_created().unwrap().close_calls(), 1);

        cache.get_or_create("c1", &config).await.unwrap();
        cache.close_all().await;
        assert!(cache.is_empty().await);
    }
}
