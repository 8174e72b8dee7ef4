//! Broker adapters.
//!
//! Each adapter maps one broker family onto the capability interfaces and
//! owns its semantic-mapping rules. Nothing outside this module (and the
//! factory) knows which families exist.

pub mod composite;

#[cfg(feature = "amqp")]
pub mod amqp;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "remoting")]
pub mod remoting;

pub use composite::CompositeClient;

use shared_types::{is_valid_topic, BrokerType, ConnectionConfig, MqError, MqResult, ProduceRequest};

/// Reject a config meant for another broker family.
pub(crate) fn ensure_broker_type(config: &ConnectionConfig, expected: BrokerType) -> MqResult<()> {
    if config.broker_type != expected {
        return Err(MqError::validation(format!(
            "invalid broker type for {} adapter",
            expected
        ))
        .with_details(config.broker_type.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_topic(topic: &str) -> MqResult<()> {
    if !is_valid_topic(topic) {
        return Err(MqError::validation("invalid topic name").with_details(format!("{:?}", topic)));
    }
    Ok(())
}

pub(crate) fn validate_topics(topics: &[String]) -> MqResult<()> {
    if topics.is_empty() {
        return Err(MqError::validation("at least one topic is required"));
    }
    topics.iter().try_for_each(|t| validate_topic(t))
}

/// Empty batches and bad topic names fail before any network I/O.
pub(crate) fn validate_batch(requests: &[ProduceRequest]) -> MqResult<()> {
    if requests.is_empty() {
        return Err(MqError::validation("batch must contain at least one message"));
    }
    requests.iter().try_for_each(|r| validate_topic(&r.topic))
}

pub(crate) fn not_connected(family: &str) -> MqError {
    MqError::connection(format!("not connected to {}", family))
}

pub(crate) fn lossy(bytes: Option<&[u8]>) -> String {
    bytes
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shared_types::ErrorKind;

    proptest! {
        #[test]
        fn prop_topics_with_whitespace_are_rejected(
            prefix in "[a-z0-9._-]{0,8}",
            blank in "[ \t\n\r]",
            suffix in "[a-z0-9._-]{0,8}",
        ) {
            let topic = format!("{}{}{}", prefix, blank, suffix);
            let err = validate_topic(&topic).unwrap_err();
            prop_assert!(err.is_kind(ErrorKind::Validation));
        }

        #[test]
        fn prop_plain_topics_are_accepted(topics in prop::collection::vec("[A-Za-z0-9._-]{1,24}", 1..6)) {
            prop_assert!(validate_topics(&topics).is_ok());
            let batch: Vec<ProduceRequest> =
                topics.iter().map(|t| ProduceRequest::new("c", t.as_str())).collect();
            prop_assert!(validate_batch(&batch).is_ok());
        }

        #[test]
        fn prop_one_bad_entry_fails_the_batch(
            topics in prop::collection::vec("[a-z]{1,12}", 0..5),
            at in any::<prop::sample::Index>(),
        ) {
            let mut batch: Vec<ProduceRequest> =
                topics.iter().map(|t| ProduceRequest::new("c", t.as_str())).collect();
            let slot = at.index(batch.len() + 1);
            batch.insert(slot, ProduceRequest::new("c", ""));
            prop_assert!(validate_batch(&batch).unwrap_err().is_kind(ErrorKind::Validation));
        }
    }

    #[test]
    fn test_ensure_broker_type() {
        let cfg = ConnectionConfig::new("x", BrokerType::Kafka, "localhost", 9092);
        assert!(ensure_broker_type(&cfg, BrokerType::Kafka).is_ok());
        let err = ensure_broker_type(&cfg, BrokerType::RabbitMq).unwrap_err();
        assert!(err.is_kind(ErrorKind::Validation));
    }

    #[test]
    fn test_empty_batch_is_validation() {
        let err = validate_batch(&[]).unwrap_err();
        assert!(err.is_kind(ErrorKind::Validation));
    }

    #[test]
    fn test_batch_with_bad_topic() {
        let batch = vec![ProduceRequest::new("c", "ok"), ProduceRequest::new("c", "bad topic")];
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn test_topics_validation() {
        assert!(validate_topics(&[]).is_err());
        assert!(validate_topics(&["orders".to_string()]).is_ok());
    }
}
