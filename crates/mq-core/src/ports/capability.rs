//! Capability interfaces every broker adapter satisfies.
//!
//! All methods take `&self`: adapters keep their native sessions behind
//! interior locks so one instance can be shared as `Arc<dyn ...>` between a
//! running consume loop and whoever stops it.

use async_trait::async_trait;
use futures::future::BoxFuture;
use shared_types::{
    ConnectionConfig, ConsumeRequest, ConsumerGroup, Message, MqResult, ProduceRequest,
    TestResult, TopicInfo,
};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback invoked once per received message.
///
/// An `Err` does not stop the loop. Adapters with an ack model nack and
/// requeue the message instead of acknowledging it.
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, MqResult<()>> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MqResult<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Session lifecycle shared by every capability.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Establish session state. Rejects a config whose broker type does not
    /// match the adapter with a Validation error.
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()>;

    /// Release native resources. Closing twice is harmless.
    async fn close(&self) -> MqResult<()>;

    fn is_connected(&self) -> bool;
}

#[async_trait]
pub trait Producer: Lifecycle {
    async fn produce(&self, request: &ProduceRequest) -> MqResult<()>;

    /// Publish several messages. An empty batch is a Validation error and
    /// performs no network call.
    async fn produce_batch(&self, requests: &[ProduceRequest]) -> MqResult<()>;
}

#[async_trait]
pub trait Consumer: Lifecycle {
    /// Register the topics to read. Zero topics is a Validation error raised
    /// before any native call. Must precede [`Consumer::consume`].
    async fn subscribe(&self, request: &ConsumeRequest) -> MqResult<()>;

    /// Run the receive loop until `cancel` fires or the broker ends the
    /// session. Returns `Ok(())` when stopped through the token.
    async fn consume(&self, cancel: CancellationToken, handler: MessageHandler) -> MqResult<()>;
}

#[async_trait]
pub trait Admin: Lifecycle {
    /// Probe the broker. Never fails: problems yield `success == false`,
    /// with latency measured from call entry.
    async fn test_connection(&self) -> TestResult;

    /// May legitimately be empty when the broker cannot enumerate topics.
    async fn list_topics(&self) -> MqResult<Vec<TopicInfo>>;

    /// `partitions` and `replicas` are hints; queue brokers ignore them.
    async fn create_topic(&self, name: &str, partitions: i32, replicas: i16) -> MqResult<()>;

    async fn delete_topic(&self, name: &str) -> MqResult<()>;

    /// Empty for brokers without consumer groups.
    async fn list_consumer_groups(&self) -> MqResult<Vec<ConsumerGroup>>;
}

/// Producer, consumer and admin behind one session lifecycle.
///
/// `is_connected` must report producer-connected AND consumer-connected.
pub trait Client: Producer + Consumer + Admin {}

impl<T> Client for T where T: Producer + Consumer + Admin {}
