//! # Consume / Produce Flows
//!
//! Messages produced through the service reach a running subscription, are
//! relayed to the event sink and recorded in history. Stopping halts
//! delivery and closes the dedicated consumer.

#[cfg(test)]
mod tests {
    use super::super::{harness, Harness};
    use mq_core::testing::{ConsumeScript, MockPlan};
    use shared_bus::{EventFilter, MqEvent};
    use shared_types::{ConsumeRequest, HistoryKind, ProduceRequest};
    use std::time::Duration;
    use tokio::time::timeout;

    const WINDOW: Duration = Duration::from_secs(2);

    async fn start(h: &Harness, topic: &str) -> String {
        let id = h
            .service
            .start_consuming(&ConsumeRequest::new("c1", [topic]).group_id("g1"))
            .await
            .expect("start consuming");
        // Let the spawned loop attach to the broker before producing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        id
    }

    async fn wait_until_inactive(h: &Harness, id: &str) {
        timeout(WINDOW, async {
            while h.service.active_subscriptions().iter().any(|s| s.id == id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscription record should be dropped");
    }

    #[tokio::test]
    async fn test_produced_messages_reach_event_sink() {
        let h = harness(MockPlan::default());
        let mut events = h.bus.subscribe(EventFilter::all());
        let id = start(&h, "orders").await;
        assert!(!id.is_empty());

        h.service
            .produce(&ProduceRequest::new("c1", "orders").key("k1").value("hello"))
            .await
            .unwrap();

        let event = timeout(WINDOW, events.recv()).await.unwrap().unwrap();
        match event {
            MqEvent::MessageReceived {
                subscription_id,
                message,
            } => {
                assert_eq!(subscription_id, id);
                assert_eq!(message.topic(), "orders");
                assert_eq!(message.key(), "k1");
                assert_eq!(message.value(), "hello");
            }
            other => panic!("expected MessageReceived, got {:?}", other),
        }

        assert_eq!(h.history.by_kind(HistoryKind::Produce).len(), 1);
        assert_eq!(h.history.by_kind(HistoryKind::Consume).len(), 1);
        h.service.stop_consuming(&id).await;
    }

    #[tokio::test]
    async fn test_other_topics_are_not_delivered() {
        let h = harness(MockPlan::default());
        let mut events = h.bus.subscribe(EventFilter::all());
        let id = start(&h, "orders").await;

        h.service
            .produce(&ProduceRequest::new("c1", "payments").value("x"))
            .await
            .unwrap();
        assert!(timeout(Duration::from_millis(150), events.recv()).await.is_err());
        h.service.stop_consuming(&id).await;
    }

    #[tokio::test]
    async fn test_stop_halts_delivery_and_restores_count() {
        let h = harness(MockPlan::default());
        let before = h.service.active_subscription_count();
        let mut events = h.bus.subscribe(EventFilter::all());
        let id = start(&h, "orders").await;
        assert_eq!(h.service.active_subscription_count(), before + 1);

        let consumer = h.factory.last_created().expect("consumer created");
        h.service.stop_consuming(&id).await;

        assert_eq!(h.service.active_subscription_count(), before);
        assert!(consumer.close_calls() >= 1);

        h.service
            .produce(&ProduceRequest::new("c1", "orders").value("late"))
            .await
            .unwrap();
        assert!(timeout(Duration::from_millis(150), events.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = harness(MockPlan::default());
        let id = start(&h, "orders").await;
        h.service.stop_consuming(&id).await;
        h.service.stop_consuming(&id).await;
        h.service.stop_consuming("never-existed").await;
        assert_eq!(h.service.active_subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_each_subscription_gets_its_own_consumer() {
        let h = harness(MockPlan::default());
        let a = start(&h, "orders").await;
        let b = start(&h, "orders").await;
        assert_ne!(a, b);
        assert_eq!(h.factory.created().len(), 2);

        let listed: Vec<String> = h.service.active_subscriptions().into_iter().map(|s| s.id).collect();
        assert!(listed.contains(&a) && listed.contains(&b));
        h.service.stop_all_consumers().await;
        assert_eq!(h.service.active_subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_loop_failure_surfaces_as_consumer_error() {
        let h = harness(MockPlan {
            consume: ConsumeScript::Fail("partition leader lost".into()),
            ..MockPlan::default()
        });
        let mut events = h.bus.subscribe(EventFilter::all());
        let id = h
            .service
            .start_consuming(&ConsumeRequest::new("c1", ["orders"]))
            .await
            .unwrap();

        let event = timeout(WINDOW, events.recv()).await.unwrap().unwrap();
        match event {
            MqEvent::ConsumerError { subscription_id, error } => {
                assert_eq!(subscription_id, id);
                assert!(error.contains("partition leader lost"));
            }
            other => panic!("expected ConsumerError, got {:?}", other),
        }
        wait_until_inactive(&h, &id).await;
    }

    #[tokio::test]
    async fn test_peer_close_and_panic_are_handled_quietly() {
        for script in [ConsumeScript::PeerClosed, ConsumeScript::ReturnOk] {
            let h = harness(MockPlan {
                consume: script,
                ..MockPlan::default()
            });
            let mut events = h.bus.subscribe(EventFilter::all());
            let id = h
                .service
                .start_consuming(&ConsumeRequest::new("c1", ["orders"]))
                .await
                .unwrap();
            wait_until_inactive(&h, &id).await;
            assert!(events.try_recv().unwrap().is_none());
        }

        let h = harness(MockPlan {
            consume: ConsumeScript::Panic,
            ..MockPlan::default()
        });
        let mut events = h.bus.subscribe(EventFilter::all());
        let id = h
            .service
            .start_consuming(&ConsumeRequest::new("c1", ["orders"]))
            .await
            .unwrap();
        let event = timeout(WINDOW, events.recv()).await.unwrap().unwrap();
        assert!(matches!(event, MqEvent::ConsumerError { .. }));
        wait_until_inactive(&h, &id).await;
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_no_record() {
        let h = harness(MockPlan {
            fail_subscribe: true,
            ..MockPlan::default()
        });
        assert!(h
            .service
            .start_consuming(&ConsumeRequest::new("c1", ["orders"]))
            .await
            .is_err());
        assert_eq!(h.service.active_subscription_count(), 0);
        let consumer = h.factory.last_created().unwrap();
        assert_eq!(consumer.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_connection_probe_is_recorded() {
        let h = harness(MockPlan::default());
        let result = h.service.test_connection("c1").await;
        assert!(result.success, "{}", result.message);
        assert_eq!(h.history.by_kind(HistoryKind::TestConnection).len(), 1);

        let missing = h.service.test_connection("nope").await;
        assert!(!missing.success);
    }
}
