//! Adapter factory: the only place that knows which broker families exist.

use crate::ports::{Admin, Client, Consumer, Producer};
use shared_types::{BrokerType, MqError, MqResult};
use std::sync::Arc;

/// Builds fresh, unconnected adapters keyed on the broker type.
///
/// Stateless and uncached: callers own reuse (see
/// [`crate::cache::ConnectionCache`]).
pub trait AdapterFactory: Send + Sync {
    fn create_client(&self, broker: BrokerType) -> MqResult<Arc<dyn Client>>;
    fn create_producer(&self, broker: BrokerType) -> MqResult<Arc<dyn Producer>>;
    fn create_consumer(&self, broker: BrokerType) -> MqResult<Arc<dyn Consumer>>;
    fn create_admin(&self, broker: BrokerType) -> MqResult<Arc<dyn Admin>>;
}

/// Factory wired to the adapters compiled into this build.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAdapterFactory;

fn disabled(broker: BrokerType) -> MqError {
    MqError::config(format!("unsupported broker type: {}", broker))
        .with_details("adapter not enabled in this build")
}

impl AdapterFactory for DefaultAdapterFactory {
    fn create_client(&self, broker: BrokerType) -> MqResult<Arc<dyn Client>> {
        match broker {
            #[cfg(feature = "kafka")]
            BrokerType::Kafka => Ok(Arc::new(crate::adapters::kafka::KafkaClient::default())),
            #[cfg(feature = "amqp")]
            BrokerType::RabbitMq => Ok(Arc::new(crate::adapters::amqp::AmqpClient::default())),
            #[cfg(feature = "remoting")]
            BrokerType::RocketMq => Ok(Arc::new(crate::adapters::remoting::RocketMqClient::default())),
            #[allow(unreachable_patterns)]
            other => Err(disabled(other)),
        }
    }

    fn create_producer(&self, broker: BrokerType) -> MqResult<Arc<dyn Producer>> {
        match broker {
            #[cfg(feature = "kafka")]
            BrokerType::Kafka => Ok(Arc::new(crate::adapters::kafka::KafkaProducer::default())),
            #[cfg(feature = "amqp")]
            BrokerType::RabbitMq => Ok(Arc::new(crate::adapters::amqp::AmqpProducer::default())),
            #[cfg(feature = "remoting")]
            BrokerType::RocketMq => {
                Ok(Arc::new(crate::adapters::remoting::RemotingProducer::default()))
            }
            #[allow(unreachable_patterns)]
            other => Err(disabled(other)),
        }
    }

    fn create_consumer(&self, broker: BrokerType) -> MqResult<Arc<dyn Consumer>> {
        match broker {
            #[cfg(feature = "kafka")]
            BrokerType::Kafka => Ok(Arc::new(crate::adapters::kafka::KafkaConsumer::default())),
            #[cfg(feature = "amqp")]
            BrokerType::RabbitMq => Ok(Arc::new(crate::adapters::amqp::AmqpConsumer::default())),
            #[cfg(feature = "remoting")]
            BrokerType::RocketMq => {
                Ok(Arc::new(crate::adapters::remoting::RemotingConsumer::default()))
            }
            #[allow(unreachable_patterns)]
            other => Err(disabled(other)),
        }
    }

    fn create_admin(&self, broker: BrokerType) -> MqResult<Arc<dyn Admin>> {
        match broker {
            #[cfg(feature = "kafka")]
            BrokerType::Kafka => Ok(Arc::new(crate::adapters::kafka::KafkaAdmin::default())),
            #[cfg(feature = "amqp")]
            BrokerType::RabbitMq => Ok(Arc::new(crate::adapters::amqp::AmqpAdmin::default())),
            #[cfg(feature = "remoting")]
            BrokerType::RocketMq => Ok(Arc::new(crate::adapters::remoting::RemotingAdmin::default())),
            #[allow(unreachable_patterns)]
            other => Err(disabled(other)),
        }
    }
}

/// Parse a raw broker-type tag, then build a client.
pub fn parse_and_create_client(
    factory: &dyn AdapterFactory,
    tag: &str,
) -> MqResult<Arc<dyn Client>> {
    factory.create_client(tag.parse()?)
}

/// Parse a raw broker-type tag, then build a producer.
pub fn parse_and_create_producer(
    factory: &dyn AdapterFactory,
    tag: &str,
) -> MqResult<Arc<dyn Producer>> {
    factory.create_producer(tag.parse()?)
}

/// Parse a raw broker-type tag, then build a consumer.
pub fn parse_and_create_consumer(
    factory: &dyn AdapterFactory,
    tag: &str,
) -> MqResult<Arc<dyn Consumer>> {
    factory.create_consumer(tag.parse()?)
}

/// Parse a raw broker-type tag, then build an admin.
pub fn parse_and_create_admin(factory: &dyn AdapterFactory, tag: &str) -> MqResult<Arc<dyn Admin>> {
    factory.create_admin(tag.parse()?)
}
