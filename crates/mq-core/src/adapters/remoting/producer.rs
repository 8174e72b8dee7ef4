use super::client::RemotingPool;
use super::message::{encode_properties, PROPERTY_KEYS, PROPERTY_UNIQ_KEY, PROPERTY_WAIT};
use super::protocol::{request_code, RemotingCommand};
use super::route::{fetch_route, MessageQueue, TopicRouteData, AUTO_CREATE_TOPIC};
use super::settings::RemotingSettings;
use super::FAMILY;
use crate::adapters::{ensure_broker_type, not_connected, validate_batch, validate_topic};
use crate::ports::{Lifecycle, Producer};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use shared_types::{generate_id, BrokerType, ConnectionConfig, MqError, MqResult, ProduceRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_TOPIC_QUEUE_NUMS: i32 = 4;

struct Session {
    settings: RemotingSettings,
    pool: RemotingPool,
}

/// Sends to master write queues, round-robin unless a queue is requested.
#[derive(Default)]
pub struct RemotingProducer {
    session: RwLock<Option<Arc<Session>>>,
    next_queue: AtomicUsize,
}

fn unique_key() -> String {
    generate_id().replace('-', "").to_uppercase()
}

pub(crate) fn send_request(producer_group: &str, queue: &MessageQueue, request: &ProduceRequest) -> RemotingCommand {
    let mut properties = Vec::with_capacity(request.headers.len() + 3);
    if !request.key.is_empty() {
        properties.push((PROPERTY_KEYS.to_string(), request.key.clone()));
    }
    properties.push((PROPERTY_UNIQ_KEY.to_string(), unique_key()));
    properties.push((PROPERTY_WAIT.to_string(), "true".to_string()));
    let mut headers: Vec<_> = request.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    headers.sort();
    properties.extend(headers);

    RemotingCommand::request(request_code::SEND_MESSAGE)
        .with_field("producerGroup", producer_group)
        .with_field("topic", &queue.topic)
        .with_field("defaultTopic", AUTO_CREATE_TOPIC)
        .with_field("defaultTopicQueueNums", DEFAULT_TOPIC_QUEUE_NUMS)
        .with_field("queueId", queue.queue_id)
        .with_field("sysFlag", 0)
        .with_field("bornTimestamp", Utc::now().timestamp_millis())
        .with_field("flag", 0)
        .with_field("properties", encode_properties(&properties))
        .with_field("reconsumeTimes", 0)
        .with_field("unitMode", false)
        .with_field("batch", false)
        .with_body(request.value.clone().into_bytes())
}

impl RemotingProducer {
    fn session(&self) -> MqResult<Arc<Session>> {
        self.session.read().clone().ok_or_else(|| not_connected(FAMILY))
    }

    /// Topic route, or the auto-create route for a topic not created yet.
    async fn route(session: &Session, topic: &str) -> MqResult<TopicRouteData> {
        let namesrv = &session.settings.namesrv_addr;
        if let Some(route) = fetch_route(&session.pool, namesrv, topic).await? {
            return Ok(route);
        }
        debug!(topic, "Topic has no route yet; using auto-create route");
        fetch_route(&session.pool, namesrv, AUTO_CREATE_TOPIC)
            .await?
            .ok_or_else(|| MqError::not_found("no route for topic").with_details(topic.to_string()))
    }

    fn pick(&self, queues: &[MessageQueue], partition: Option<i32>) -> MqResult<MessageQueue> {
        if let Some(partition) = partition {
            return queues
                .iter()
                .find(|q| q.queue_id == partition)
                .cloned()
                .ok_or_else(|| MqError::validation("no writable queue with that id").with_details(partition.to_string()));
        }
        let index = self.next_queue.fetch_add(1, Ordering::Relaxed) % queues.len();
        Ok(queues[index].clone())
    }

    async fn send(&self, session: &Session, request: &ProduceRequest) -> MqResult<()> {
        let route = Self::route(session, &request.topic).await?;
        let queues = route.write_queues(&request.topic);
        if queues.is_empty() {
            return Err(MqError::not_found("topic has no writable queue").with_details(request.topic.clone()));
        }
        let queue = self.pick(&queues, request.partition)?;
        let addr = route
            .master_addr(&queue.broker_name)
            .ok_or_else(|| MqError::connection("broker has no master").with_details(queue.broker_name.clone()))?;

        let command = send_request(&session.settings.producer_group, &queue, request);
        let response = session.pool.invoke(addr, command).await?.into_success()?;
        debug!(
            topic = %request.topic,
            broker = %queue.broker_name,
            queue_id = queue.queue_id,
            msg_id = response.field("msgId").unwrap_or(""),
            "Sent message"
        );
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for RemotingProducer {
    /// Checks that the name server accepts connections.
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()> {
        ensure_broker_type(config, BrokerType::RocketMq)?;
        let settings = RemotingSettings::from_config(config)?;
        let pool = RemotingPool::new(settings.timeout, settings.signer.clone());
        pool.get(&settings.namesrv_addr).await?;
        info!(namesrv = %settings.namesrv_addr, group = %settings.producer_group, "Remoting producer connected");

        let previous = self.session.write().replace(Arc::new(Session { settings, pool }));
        if let Some(previous) = previous {
            previous.pool.close_all().await;
        }
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        let session = self.session.write().take();
        if let Some(session) = session {
            session.pool.close_all().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.read().is_some()
    }
}

#[async_trait]
impl Producer for RemotingProducer {
    async fn produce(&self, request: &ProduceRequest) -> MqResult<()> {
        validate_topic(&request.topic)?;
        let session = self.session()?;
        self.send(&session, request).await
    }

    async fn produce_batch(&self, requests: &[ProduceRequest]) -> MqResult<()> {
        validate_batch(requests)?;
        let session = self.session()?;
        for request in requests {
            self.send(&session, request).await?;
        }
        Ok(())
    }
}
