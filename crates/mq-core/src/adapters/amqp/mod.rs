//! AMQP queue-broker adapter on lapin.
//!
//! A "topic" is a durable queue on the default exchange, declared on demand.
//! Partitions and replicas do not exist here: topics report one of each and
//! the hints passed to `create_topic` are ignored. Consumer groups are not
//! modelled.

mod admin;
mod consumer;
mod errors;
mod management;
mod producer;
mod session;

pub use admin::AmqpAdmin;
pub use consumer::AmqpConsumer;
pub use management::QueueInfo;
pub use producer::AmqpProducer;
pub use session::AmqpSettings;

use super::CompositeClient;

pub(crate) const FAMILY: &str = "RabbitMQ";

pub type AmqpClient = CompositeClient<AmqpProducer, AmqpConsumer, AmqpAdmin>;
