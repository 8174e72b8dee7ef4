use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use shared_types::MqError;

/// Map a native error onto the shared error model.
pub(crate) fn map_kafka_error(context: &str, err: &KafkaError) -> MqError {
    let details = err.to_string();
    let base = match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::Resolve
            | RDKafkaErrorCode::NetworkException,
        ) => MqError::connection(context),
        Some(
            RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => MqError::auth(context),
        Some(
            RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut,
        ) => MqError::timeout(context),
        Some(
            RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownPartition,
        ) => MqError::not_found(context),
        Some(RDKafkaErrorCode::InvalidTopic | RDKafkaErrorCode::TopicAlreadyExists) => {
            MqError::validation(context)
        }
        _ => match err {
            KafkaError::ClientCreation(_) | KafkaError::ClientConfig(..) => MqError::config(context),
            KafkaError::Subscription(_) => MqError::subscription(context),
            _ => MqError::network(context),
        },
    };
    base.with_details(details)
}

/// Errors that end a consume loop; everything else is retried.
pub(crate) fn is_fatal_consume_error(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::Authentication
                | RDKafkaErrorCode::SaslAuthenticationFailed
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::GroupAuthorizationFailed
                | RDKafkaErrorCode::Fatal
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ErrorKind;

    #[test]
    fn test_transport_is_connection() {
        let err = KafkaError::MetadataFetch(RDKafkaErrorCode::AllBrokersDown);
        let mapped = map_kafka_error("failed to fetch metadata", &err);
        assert!(mapped.is_kind(ErrorKind::Connection));
        assert!(mapped.details().is_some());
    }

    #[test]
    fn test_timeout_and_auth() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        assert!(map_kafka_error("send", &err).is_kind(ErrorKind::Timeout));

        let err = KafkaError::MessageConsumption(RDKafkaErrorCode::TopicAuthorizationFailed);
        assert!(map_kafka_error("recv", &err).is_kind(ErrorKind::Auth));
        assert!(is_fatal_consume_error(&err));
    }

    #[test]
    fn test_transient_consume_error_not_fatal() {
        let err = KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure);
        assert!(!is_fatal_consume_error(&err));
    }
}
