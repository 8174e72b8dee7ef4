//! In-memory adapter and factory for tests.
//!
//! [`MockBroker`] routes produced messages to running mock consumers, so
//! produce → consume → event-sink flows can be exercised without a broker.

use crate::factory::AdapterFactory;
use crate::ports::{Admin, Client, Consumer, Lifecycle, MessageHandler, Producer};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{
    BrokerType, ConnectionConfig, ConsumeRequest, ConsumerGroup, Message, MqError, MqResult,
    ProduceRequest, TestResult, TopicInfo,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Shared in-memory message fabric.
pub struct MockBroker {
    sender: broadcast::Sender<Message>,
    topics: Mutex<Vec<String>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            topics: Mutex::new(Vec::new()),
        }
    }
}

impl MockBroker {
    fn publish(&self, request: &ProduceRequest) {
        let message = Message::builder(request.topic.clone())
            .key(request.key.clone())
            .value(request.value.clone())
            .headers(request.headers.clone())
            .build();
        self.declare(&request.topic);
        let _ = self.sender.send(message);
    }

    fn declare(&self, topic: &str) {
        let mut topics = self.topics.lock();
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    }
}

/// How a consume loop run by a [`MockAdapter`] ends.
#[derive(Debug, Clone, Default)]
pub enum ConsumeScript {
    /// Relay broker messages until cancelled.
    #[default]
    UntilCancelled,
    /// Return `Ok(())` immediately, as after a clean broker-side close.
    ReturnOk,
    /// Fail with a Network error carrying this text.
    Fail(String),
    /// Fail with an error flagged as a broker-initiated close.
    PeerClosed,
    /// Panic inside the loop.
    Panic,
}

/// Failure injection for a [`MockAdapter`].
#[derive(Debug, Clone, Default)]
pub struct MockPlan {
    pub fail_connect: bool,
    pub fail_subscribe: bool,
    pub panic_on_test: bool,
    pub connect_delay: Option<Duration>,
    pub consume: ConsumeScript,
}

/// Adapter implementing every capability in memory.
pub struct MockAdapter {
    broker: Arc<MockBroker>,
    plan: MockPlan,
    connected: AtomicBool,
    topics: Mutex<Vec<String>>,
    connect_calls: AtomicUsize,
    close_calls: AtomicUsize,
    produce_calls: AtomicUsize,
    native_subscribe_calls: AtomicUsize,
}

impl MockAdapter {
    pub fn new(broker: Arc<MockBroker>, plan: MockPlan) -> Self {
        Self {
            broker,
            plan,
            connected: AtomicBool::new(false),
            topics: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            produce_calls: AtomicUsize::new(0),
            native_subscribe_calls: AtomicUsize::new(0),
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn produce_calls(&self) -> usize {
        self.produce_calls.load(Ordering::SeqCst)
    }

    pub fn native_subscribe_calls(&self) -> usize {
        self.native_subscribe_calls.load(Ordering::SeqCst)
    }

    /// Simulate the session dropping.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Lifecycle for MockAdapter {
    async fn connect(&self, _config: &ConnectionConfig) -> MqResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.plan.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.plan.fail_connect {
            return Err(MqError::connection("mock connect refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Producer for MockAdapter {
    async fn produce(&self, request: &ProduceRequest) -> MqResult<()> {
        crate::adapters::validate_topic(&request.topic)?;
        self.produce_calls.fetch_add(1, Ordering::SeqCst);
        self.broker.publish(request);
        Ok(())
    }

    async fn produce_batch(&self, requests: &[ProduceRequest]) -> MqResult<()> {
        crate::adapters::validate_batch(requests)?;
        for request in requests {
            self.produce(request).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Consumer for MockAdapter {
    async fn subscribe(&self, request: &ConsumeRequest) -> MqResult<()> {
        crate::adapters::validate_topics(&request.topics)?;
        self.native_subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.plan.fail_subscribe {
            return Err(MqError::subscription("mock subscribe rejected"));
        }
        *self.topics.lock() = request.topics.clone();
        Ok(())
    }

    async fn consume(&self, cancel: CancellationToken, handler: MessageHandler) -> MqResult<()> {
        match &self.plan.consume {
            ConsumeScript::ReturnOk => return Ok(()),
            ConsumeScript::Fail(text) => return Err(MqError::network(text.clone())),
            ConsumeScript::PeerClosed => {
                return Err(MqError::network("session ended by broker").peer_closed())
            }
            ConsumeScript::Panic => panic!("mock consume loop exploded"),
            ConsumeScript::UntilCancelled => {}
        }

        let topics = self.topics.lock().clone();
        let mut receiver = self.broker.sender.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = receiver.recv() => match received {
                    Ok(message) if topics.iter().any(|t| t == message.topic()) => {
                        let _ = handler(message).await;
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
}

#[async_trait]
impl Admin for MockAdapter {
    async fn test_connection(&self) -> TestResult {
        let started = Instant::now();
        if self.plan.panic_on_test {
            panic!("mock admin exploded");
        }
        if self.is_connected() {
            TestResult::ok("Connected to mock broker", started)
        } else {
            TestResult::failed("not connected to mock broker", started)
        }
    }

    async fn list_topics(&self) -> MqResult<Vec<TopicInfo>> {
        Ok(self
            .broker
            .topics
            .lock()
            .iter()
            .map(|t| TopicInfo::new(t.clone(), 1, 1))
            .collect())
    }

    async fn create_topic(&self, name: &str, _partitions: i32, _replicas: i16) -> MqResult<()> {
        crate::adapters::validate_topic(name)?;
        self.broker.declare(name);
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> MqResult<()> {
        let mut topics = self.broker.topics.lock();
        let before = topics.len();
        topics.retain(|t| t != name);
        if topics.len() == before {
            return Err(MqError::not_found(format!("topic not found: {}", name)));
        }
        Ok(())
    }

    async fn list_consumer_groups(&self) -> MqResult<Vec<ConsumerGroup>> {
        Ok(Vec::new())
    }
}

/// Factory producing [`MockAdapter`]s that share one [`MockBroker`].
#[derive(Default)]
pub struct MockFactory {
    broker: Arc<MockBroker>,
    plan: Mutex<MockPlan>,
    created: Mutex<Vec<Arc<MockAdapter>>>,
}

impl MockFactory {
    pub fn new(plan: MockPlan) -> Self {
        Self {
            plan: Mutex::new(plan),
            ..Self::default()
        }
    }

    /// Plan applied to adapters created from now on.
    pub fn set_plan(&self, plan: MockPlan) {
        *self.plan.lock() = plan;
    }

    /// Every adapter handed out so far, oldest first.
    pub fn created(&self) -> Vec<Arc<MockAdapter>> {
        self.created.lock().clone()
    }

    pub fn last_created(&self) -> Option<Arc<MockAdapter>> {
        self.created.lock().last().cloned()
    }

    fn make(&self) -> Arc<MockAdapter> {
        let adapter = Arc::new(MockAdapter::new(self.broker.clone(), self.plan.lock().clone()));
        self.created.lock().push(adapter.clone());
        adapter
    }
}

impl AdapterFactory for MockFactory {
    fn create_client(&self, _broker: BrokerType) -> MqResult<Arc<dyn Client>> {
        Ok(self.make())
    }

    fn create_producer(&self, _broker: BrokerType) -> MqResult<Arc<dyn Producer>> {
        Ok(self.make())
    }

    fn create_consumer(&self, _broker: BrokerType) -> MqResult<Arc<dyn Consumer>> {
        Ok(self.make())
    }

    fn create_admin(&self, _broker: BrokerType) -> MqResult<Arc<dyn Admin>> {
        Ok(self.make())
    }
}
