use super::errors::{is_normal_close, map_amqp_error};
use super::session::{declare_durable, AmqpSettings, Session};
use super::FAMILY;
use crate::adapters::{ensure_broker_type, not_connected, validate_topics};
use crate::ports::{Consumer, Lifecycle, MessageHandler};
use async_trait::async_trait;
use futures::future::try_join_all;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::Channel;
use parking_lot::RwLock;
use shared_types::{generate_id, BrokerType, ConnectionConfig, ConsumeRequest, Message, MqError, MqResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct State {
    session: Option<Arc<Session>>,
    queues: Vec<String>,
}

/// Manual-ack consumer running one native consumer per subscribed queue.
#[derive(Default)]
pub struct AmqpConsumer {
    state: RwLock<State>,
}

fn field_to_string(value: &AMQPValue) -> String {
    match value {
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        AMQPValue::ShortString(s) => s.as_str().to_string(),
        AMQPValue::Boolean(b) => b.to_string(),
        AMQPValue::ShortShortInt(n) => n.to_string(),
        AMQPValue::ShortShortUInt(n) => n.to_string(),
        AMQPValue::ShortInt(n) => n.to_string(),
        AMQPValue::ShortUInt(n) => n.to_string(),
        AMQPValue::LongInt(n) => n.to_string(),
        AMQPValue::LongUInt(n) => n.to_string(),
        AMQPValue::LongLongInt(n) => n.to_string(),
        AMQPValue::Float(n) => n.to_string(),
        AMQPValue::Double(n) => n.to_string(),
        AMQPValue::Timestamp(t) => t.to_string(),
        other => format!("{:?}", other),
    }
}

/// The key is the `message_id` property when set, else the routing key.
pub(crate) fn to_message(queue: &str, delivery: &Delivery) -> Message {
    let props = &delivery.properties;
    let headers: HashMap<String, String> = props
        .headers()
        .as_ref()
        .map(|table| {
            table
                .inner()
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), field_to_string(v)))
                .collect()
        })
        .unwrap_or_default();
    let key = props
        .message_id()
        .as_ref()
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|| delivery.routing_key.as_str().to_string());

    let mut builder = Message::builder(queue)
        .key(key)
        .value(String::from_utf8_lossy(&delivery.data).into_owned())
        .headers(headers);
    if let Some(seconds) = props.timestamp().as_ref().and_then(|t| i64::try_from(*t).ok()) {
        builder = builder.timestamp_millis(seconds.saturating_mul(1000));
    }
    builder.build()
}

fn stream_error(queue: &str, err: &lapin::Error) -> MqError {
    if is_normal_close(err) {
        MqError::connection("connection closed")
            .with_details(format!("queue {}: {}", queue, err))
            .peer_closed()
    } else {
        map_amqp_error(&format!("consume from queue {} failed", queue), err)
    }
}

/// What to tell the broker about a delivery once the handler has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settle {
    Ack,
    NackRequeue,
}

impl Settle {
    /// A failed handler puts the message back on its queue.
    pub(crate) fn for_outcome(outcome: &MqResult<()>) -> Self {
        match outcome {
            Ok(()) => Settle::Ack,
            Err(_) => Settle::NackRequeue,
        }
    }

    fn nack_options(self) -> BasicNackOptions {
        BasicNackOptions {
            requeue: self == Settle::NackRequeue,
            ..BasicNackOptions::default()
        }
    }
}

async fn drain(
    queue: String,
    mut stream: lapin::Consumer,
    cancel: CancellationToken,
    handler: MessageHandler,
) -> MqResult<()> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            next = stream.next() => next,
        };
        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => return Err(stream_error(&queue, &e)),
            None => {
                return Err(MqError::connection("connection closed")
                    .with_details(format!("consumer stream for queue {} ended", queue))
                    .peer_closed())
            }
        };

        let outcome = handler(to_message(&queue, &delivery)).await;
        let settle = Settle::for_outcome(&outcome);
        let settled = match settle {
            Settle::Ack => delivery.ack(BasicAckOptions::default()).await,
            Settle::NackRequeue => {
                if let Err(e) = &outcome {
                    warn!(queue = %queue, error = %e, "Handler failed; requeueing message");
                }
                delivery.nack(settle.nack_options()).await
            }
        };
        if let Err(e) = settled {
            return Err(stream_error(&queue, &e));
        }
    }
}

async fn cancel_consumers(channel: &Channel, tags: &[String]) {
    for tag in tags {
        if let Err(e) = channel.basic_cancel(tag, BasicCancelOptions::default()).await {
            debug!(tag = %tag, error = %e, "Consumer cancel failed");
        }
    }
}

#[async_trait]
impl Lifecycle for AmqpConsumer {
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()> {
        ensure_broker_type(config, BrokerType::RabbitMq)?;
        let session = Session::open(AmqpSettings::from_config(config)?).await?;
        info!(uri = %session.settings.display_uri(), "AMQP consumer connected");

        let previous = {
            let mut state = self.state.write();
            state.queues.clear();
            state.session.replace(Arc::new(session))
        };
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        let session = {
            let mut state = self.state.write();
            state.queues.clear();
            state.session.take()
        };
        if let Some(session) = session {
            session.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.read().session.as_ref().is_some_and(|s| s.is_open())
    }
}

#[async_trait]
impl Consumer for AmqpConsumer {
    async fn subscribe(&self, request: &ConsumeRequest) -> MqResult<()> {
        validate_topics(&request.topics)?;
        let session = self
            .state
            .read()
            .session
            .clone()
            .ok_or_else(|| not_connected(FAMILY))?;

        for queue in &request.topics {
            declare_durable(&session.channel, queue).await.map_err(|e| {
                MqError::subscription(format!("failed to declare queue {}", queue))
                    .with_details(e.to_string())
            })?;
        }
        debug!(queues = ?request.topics, "AMQP queues declared");
        self.state.write().queues = request.topics.clone();
        Ok(())
    }

    async fn consume(&self, cancel: CancellationToken, handler: MessageHandler) -> MqResult<()> {
        let (session, queues) = {
            let state = self.state.read();
            let session = state.session.clone().ok_or_else(|| not_connected(FAMILY))?;
            (session, state.queues.clone())
        };
        if queues.is_empty() {
            return Err(MqError::subscription("consumer not subscribed to any queue"));
        }

        let channel = &session.channel;
        channel
            .basic_qos(session.settings.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| map_amqp_error("failed to set QoS", &e))?;

        let mut tags = Vec::with_capacity(queues.len());
        let mut loops = Vec::with_capacity(queues.len());
        let siblings = cancel.child_token();
        for queue in queues {
            let tag = format!("mq-toolkit-{}", generate_id());
            let stream = match channel
                .basic_consume(&queue, &tag, BasicConsumeOptions::default(), FieldTable::default())
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    siblings.cancel();
                    cancel_consumers(channel, &tags).await;
                    return Err(MqError::subscription(format!(
                        "failed to start consuming from queue {}",
                        queue
                    ))
                    .with_details(e.to_string()));
                }
            };
            info!(queue = %queue, tag = %tag, "AMQP consumer started");
            tags.push(tag);
            loops.push(drain(queue, stream, siblings.clone(), handler.clone()));
        }

        // The first failing queue drops its siblings.
        let result = try_join_all(loops).await.map(|_| ());
        siblings.cancel();
        if channel.status().connected() {
            cancel_consumers(channel, &tags).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::handler_fn;
    use shared_types::ErrorKind;

    #[test]
    fn test_field_values_render_as_text() {
        assert_eq!(field_to_string(&AMQPValue::LongString("abc".into())), "abc");
        assert_eq!(field_to_string(&AMQPValue::Boolean(true)), "true");
        assert_eq!(field_to_string(&AMQPValue::LongInt(-7)), "-7");
    }

    #[test]
    fn test_success_acks_and_failure_requeues() {
        assert_eq!(Settle::for_outcome(&Ok(())), Settle::Ack);
        assert_eq!(
            Settle::for_outcome(&Err(MqError::validation("bad payload"))),
            Settle::NackRequeue
        );
        assert_eq!(
            Settle::for_outcome(&Err(MqError::connection("connection closed").peer_closed())),
            Settle::NackRequeue
        );
    }

    #[test]
    fn test_nack_requeues_the_delivery() {
        let options = Settle::NackRequeue.nack_options();
        assert!(options.requeue);
        assert!(!options.multiple);
    }

    #[tokio::test]
    async fn test_handler_outcome_drives_settlement() {
        let handler = handler_fn(|message: Message| async move {
            if message.key() == "poison" {
                Err(MqError::internal("cannot process"))
            } else {
                Ok(())
            }
        });
        let good = handler(Message::builder("orders").key("k1").build()).await;
        let bad = handler(Message::builder("orders").key("poison").build()).await;
        assert_eq!(Settle::for_outcome(&good), Settle::Ack);
        assert_eq!(Settle::for_outcome(&bad), Settle::NackRequeue);
    }

    #[tokio::test]
    async fn test_subscribe_validates_before_connect_check() {
        let consumer = AmqpConsumer::default();
        let err = consumer
            .subscribe(&ConsumeRequest::new("c", Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Validation));

        let err = consumer
            .subscribe(&ConsumeRequest::new("c", ["orders"]))
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Connection));
    }

    #[tokio::test]
    async fn test_consume_without_session() {
        let consumer = AmqpConsumer::default();
        let handler = handler_fn(|_| async { Ok(()) });
        let err = consumer
            .consume(CancellationToken::new(), handler)
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Connection));
        consumer.close().await.unwrap();
    }
}
