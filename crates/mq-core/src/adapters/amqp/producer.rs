use super::errors::map_amqp_error;
use super::session::{declare_durable, AmqpSettings, Session};
use super::FAMILY;
use crate::adapters::{ensure_broker_type, not_connected, validate_batch, validate_topic};
use crate::ports::{Lifecycle, Producer};
use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::BasicProperties;
use parking_lot::RwLock;
use shared_types::{BrokerType, ConnectionConfig, MqError, MqResult, ProduceRequest};
use std::sync::Arc;
use tracing::{debug, info};

const PERSISTENT: u8 = 2;

/// Publisher on the default exchange with confirms enabled.
#[derive(Default)]
pub struct AmqpProducer {
    session: RwLock<Option<Arc<Session>>>,
}

impl AmqpProducer {
    fn session(&self) -> MqResult<Arc<Session>> {
        self.session.read().clone().ok_or_else(|| not_connected(FAMILY))
    }
}

pub(crate) fn properties(request: &ProduceRequest) -> BasicProperties {
    let mut headers = FieldTable::default();
    for (key, value) in &request.headers {
        headers.insert(ShortString::from(key.as_str()), AMQPValue::LongString(value.as_str().into()));
    }
    let timestamp = u64::try_from(Utc::now().timestamp()).unwrap_or_default();

    let properties = BasicProperties::default()
        .with_content_type("text/plain".into())
        .with_delivery_mode(PERSISTENT)
        .with_timestamp(timestamp)
        .with_headers(headers);
    if request.key.is_empty() {
        properties
    } else {
        properties.with_message_id(request.key.as_str().into())
    }
}

async fn publish(session: &Session, request: &ProduceRequest) -> MqResult<()> {
    declare_durable(&session.channel, &request.topic).await?;
    let confirmation = session
        .channel
        .basic_publish(
            "",
            &request.topic,
            BasicPublishOptions::default(),
            request.value.as_bytes(),
            properties(request),
        )
        .await
        .map_err(|e| map_amqp_error("failed to publish message", &e))?
        .await
        .map_err(|e| map_amqp_error("failed to confirm message", &e))?;

    if confirmation.is_nack() {
        return Err(MqError::connection("broker rejected message").with_details(request.topic.clone()));
    }
    debug!(queue = %request.topic, "Published message");
    Ok(())
}

#[async_trait]
impl Lifecycle for AmqpProducer {
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()> {
        ensure_broker_type(config, BrokerType::RabbitMq)?;
        let session = Session::open(AmqpSettings::from_config(config)?).await?;
        if let Err(e) = session
            .channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
        {
            session.shutdown().await;
            return Err(map_amqp_error("failed to enable publisher confirms", &e));
        }

        info!(uri = %session.settings.display_uri(), "AMQP producer connected");
        let previous = self.session.write().replace(Arc::new(session));
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        let session = self.session.write().take();
        if let Some(session) = session {
            session.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.read().as_ref().is_some_and(|s| s.is_open())
    }
}

#[async_trait]
impl Producer for AmqpProducer {
    async fn produce(&self, request: &ProduceRequest) -> MqResult<()> {
        validate_topic(&request.topic)?;
        let session = self.session()?;
        publish(&session, request).await
    }

    /// No native batch API: publishes one by one, stopping at the first failure.
    async fn produce_batch(&self, requests: &[ProduceRequest]) -> MqResult<()> {
        validate_batch(requests)?;
        let session = self.session()?;
        for request in requests {
            publish(&session, request).await?;
        }
        Ok(())
    }
}
