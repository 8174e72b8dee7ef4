//! # Input Validation
//!
//! Empty batches and empty topic lists fail with a Validation error before
//! any client is built or any native call is made, for every broker family.

#[cfg(test)]
mod tests {
    use super::super::harness;
    use mq_core::testing::MockPlan;
    use mq_core::{AdapterFactory, Consumer, DefaultAdapterFactory, Producer};
    use proptest::prelude::*;
    use shared_types::{BrokerType, ConsumeRequest, ErrorKind, ProduceRequest};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    fn broker() -> impl Strategy<Value = BrokerType> {
        prop::sample::select(BrokerType::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_empty_batch_is_validation(broker in broker()) {
            let err = runtime().block_on(async {
                let producer = DefaultAdapterFactory.create_producer(broker).unwrap();
                producer.produce_batch(&[]).await.unwrap_err()
            });
            prop_assert!(err.is_kind(ErrorKind::Validation));
        }

        #[test]
        fn prop_subscribe_without_topics_is_validation(
            broker in broker(),
            group in "[a-z0-9-]{0,16}",
            from_beginning in any::<bool>(),
        ) {
            let err = runtime().block_on(async {
                let consumer = DefaultAdapterFactory.create_consumer(broker).unwrap();
                let request = ConsumeRequest::new("c1", Vec::<String>::new())
                    .group_id(group)
                    .from_beginning(from_beginning);
                consumer.subscribe(&request).await.unwrap_err()
            });
            prop_assert!(err.is_kind(ErrorKind::Validation));
        }

        #[test]
        fn prop_blank_topic_in_batch_is_validation(
            broker in broker(),
            valid in 0usize..4,
            blank in "[ \t]{1,4}",
        ) {
            let mut batch: Vec<ProduceRequest> =
                (0..valid).map(|i| ProduceRequest::new("c1", format!("t{}", i))).collect();
            batch.push(ProduceRequest::new("c1", blank));
            let err = runtime().block_on(async {
                let producer = DefaultAdapterFactory.create_producer(broker).unwrap();
                producer.produce_batch(&batch).await.unwrap_err()
            });
            prop_assert!(err.is_kind(ErrorKind::Validation));
        }
    }

    #[tokio::test]
    async fn test_service_rejects_empty_batch_without_io() {
        let h = harness(MockPlan::default());
        let err = h.service.produce_batch("c1", &[]).await.unwrap_err();
        assert!(err.is_kind(ErrorKind::Validation));
        assert!(h.factory.created().is_empty());
    }

    #[tokio::test]
    async fn test_service_rejects_empty_topic_list_without_consumer() {
        let h = harness(MockPlan::default());
        let err = h
            .service
            .start_consuming(&ConsumeRequest::new("c1", Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Validation));
        assert!(h.factory.created().is_empty());
        assert_eq!(h.service.active_subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_connection_is_reported() {
        let h = harness(MockPlan::default());
        let err = h
            .service
            .produce(&ProduceRequest::new("missing", "orders"))
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::NotFound) || err.is_kind(ErrorKind::Config));
        assert!(h.service.list_topics("").await.unwrap_err().is_kind(ErrorKind::Validation));
    }
}
