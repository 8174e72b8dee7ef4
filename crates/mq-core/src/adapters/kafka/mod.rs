//! Partitioned-log adapter on librdkafka.
//!
//! | Shared concept  | Native concept                                 |
//! |-----------------|------------------------------------------------|
//! | topic           | topic (partitions, replication factor)         |
//! | group id        | consumer group                                 |
//! | from_beginning  | `auto.offset.reset=earliest`                   |
//! | auto_commit     | `enable.auto.commit`                           |
//! | key / headers   | record key / record headers                    |

mod admin;
mod consumer;
mod errors;
mod producer;
mod settings;

pub use admin::KafkaAdmin;
pub use consumer::KafkaConsumer;
pub use producer::KafkaProducer;
pub use settings::{KafkaSettings, SaslSettings};

use super::CompositeClient;

pub(crate) const FAMILY: &str = "Kafka";

/// Producer, consumer and admin sharing one connection config.
pub type KafkaClient = CompositeClient<KafkaProducer, KafkaConsumer, KafkaAdmin>;
