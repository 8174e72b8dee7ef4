//! Client assembled from separate producer, consumer and admin parts.

use crate::ports::{Admin, Consumer, Lifecycle, MessageHandler, Producer};
use async_trait::async_trait;
use shared_types::{
    ConnectionConfig, ConsumeRequest, ConsumerGroup, MqResult, ProduceRequest, TestResult,
    TopicInfo,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Full client built from one producer, one consumer and one admin.
///
/// Connecting connects all three parts in order. If a later part fails, the
/// parts already connected are closed again before the error is returned.
pub struct CompositeClient<P, C, A> {
    producer: Arc<P>,
    consumer: Arc<C>,
    admin: Arc<A>,
}

impl<P, C, A> CompositeClient<P, C, A>
where
    P: Producer,
    C: Consumer,
    A: Admin,
{
    pub fn new(producer: P, consumer: C, admin: A) -> Self {
        Self {
            producer: Arc::new(producer),
            consumer: Arc::new(consumer),
            admin: Arc::new(admin),
        }
    }

    pub fn producer(&self) -> &Arc<P> {
        &self.producer
    }

    pub fn consumer(&self) -> &Arc<C> {
        &self.consumer
    }

    pub fn admin(&self) -> &Arc<A> {
        &self.admin
    }
}

impl<P, C, A> Default for CompositeClient<P, C, A>
where
    P: Producer + Default,
    C: Consumer + Default,
    A: Admin + Default,
{
    fn default() -> Self {
        Self::new(P::default(), C::default(), A::default())
    }
}

async fn close_quietly<L: Lifecycle + ?Sized>(part: &L, name: &str) {
    if let Err(e) = part.close().await {
        warn!(part = name, error = %e, "Failed to close client part");
    }
}

#[async_trait]
impl<P, C, A> Lifecycle for CompositeClient<P, C, A>
where
    P: Producer,
    C: Consumer,
    A: Admin,
{
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()> {
        self.producer.connect(config).await?;

        if let Err(e) = self.consumer.connect(config).await {
            close_quietly(self.producer.as_ref(), "producer").await;
            return Err(e);
        }

        if let Err(e) = self.admin.connect(config).await {
            close_quietly(self.consumer.as_ref(), "consumer").await;
            close_quietly(self.producer.as_ref(), "producer").await;
            return Err(e);
        }

        Ok(())
    }

    /// Closes every part; the first failure is returned.
    async fn close(&self) -> MqResult<()> {
        let producer = self.producer.close().await;
        let consumer = self.consumer.close().await;
        let admin = self.admin.close().await;
        producer.and(consumer).and(admin)
    }

    fn is_connected(&self) -> bool {
        self.producer.is_connected() && self.consumer.is_connected()
    }
}

#[async_trait]
impl<P, C, A> Producer for CompositeClient<P, C, A>
where
    P: Producer,
    C: Consumer,
    A: Admin,
{
    async fn produce(&self, request: &ProduceRequest) -> MqResult<()> {
        self.producer.produce(request).await
    }

    async fn produce_batch(&self, requests: &[ProduceRequest]) -> MqResult<()> {
        self.producer.produce_batch(requests).await
    }
}

#[async_trait]
impl<P, C, A> Consumer for CompositeClient<P, C, A>
where
    P: Producer,
    C: Consumer,
    A: Admin,
{
    async fn subscribe(&self, request: &ConsumeRequest) -> MqResult<()> {
        self.consumer.subscribe(request).await
    }

    async fn consume(&self, cancel: CancellationToken, handler: MessageHandler) -> MqResult<()> {
        self.consumer.consume(cancel, handler).await
    }
}

#[async_trait]
impl<P, C, A> Admin for CompositeClient<P, C, A>
where
    P: Producer,
    C: Consumer,
    A: Admin,
{
    async fn test_connection(&self) -> TestResult {
        self.admin.test_connection().await
    }

    async fn list_topics(&self) -> MqResult<Vec<TopicInfo>> {
        self.admin.list_topics().await
    }

    async fn create_topic(&self, name: &str, partitions: i32, replicas: i16) -> MqResult<()> {
        self.admin.create_topic(name, partitions, replicas).await
    }

    async fn delete_topic(&self, name: &str) -> MqResult<()> {
        self.admin.delete_topic(name).await
    }

    async fn list_consumer_groups(&self) -> MqResult<Vec<ConsumerGroup>> {
        self.admin.list_consumer_groups().await
    }
}
