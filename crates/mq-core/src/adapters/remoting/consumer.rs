//! Pull consumer for inspecting topics.
//!
//! There is no group rebalance: every read queue of every subscribed topic is
//! pulled by this one consumer, starting from the group's committed offset.

use super::client::RemotingPool;
use super::message::decode_messages;
use super::protocol::{request_code, response_code, response_error, RemotingCommand};
use super::route::{require_route, MessageQueue};
use super::settings::RemotingSettings;
use super::FAMILY;
use crate::adapters::{ensure_broker_type, not_connected, validate_topics};
use crate::ports::{Consumer, Lifecycle, MessageHandler};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{BrokerType, ConnectionConfig, ConsumeRequest, ErrorKind, MqError, MqResult};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FLAG_SUBSCRIPTION: i32 = 1 << 2;
const SUBSCRIBE_ALL: &str = "*";

struct Session {
    config: ConnectionConfig,
    settings: RemotingSettings,
    pool: RemotingPool,
}

struct Assignment {
    group: String,
    queues: Vec<(MessageQueue, String)>,
    from_beginning: bool,
    auto_commit: bool,
}

#[derive(Default)]
struct State {
    session: Option<Arc<Session>>,
    assignment: Option<Arc<Assignment>>,
}

#[derive(Default)]
pub struct RemotingConsumer {
    state: RwLock<State>,
}

/// Read position of one queue.
struct Cursor {
    queue: MessageQueue,
    addr: String,
    offset: i64,
    committed: i64,
}

enum Pulled {
    Found { next: i64, count: usize },
    Empty { next: Option<i64> },
    Skipped { next: i64 },
}

/// Fatal errors end the loop; anything else is retried on the next round.
fn is_fatal(err: &MqError) -> bool {
    matches!(err.kind(), ErrorKind::Auth | ErrorKind::Validation)
}

async fn queue_offset(pool: &RemotingPool, addr: &str, code: i32, queue: &MessageQueue) -> MqResult<i64> {
    let request = RemotingCommand::request(code)
        .with_field("topic", &queue.topic)
        .with_field("queueId", queue.queue_id);
    pool.invoke(addr, request).await?.into_success()?.field_i64("offset")
}

async fn committed_offset(pool: &RemotingPool, addr: &str, group: &str, queue: &MessageQueue) -> MqResult<Option<i64>> {
    let request = RemotingCommand::request(request_code::QUERY_CONSUMER_OFFSET)
        .with_field("consumerGroup", group)
        .with_field("topic", &queue.topic)
        .with_field("queueId", queue.queue_id);
    let response = pool.invoke(addr, request).await?;
    if response.code() == response_code::QUERY_NOT_FOUND {
        return Ok(None);
    }
    let offset = response.into_success()?.field_i64("offset")?;
    Ok((offset >= 0).then_some(offset))
}

async fn commit(pool: &RemotingPool, group: &str, cursor: &mut Cursor) -> MqResult<()> {
    if cursor.offset == cursor.committed {
        return Ok(());
    }
    let request = RemotingCommand::request(request_code::UPDATE_CONSUMER_OFFSET)
        .with_field("consumerGroup", group)
        .with_field("topic", &cursor.queue.topic)
        .with_field("queueId", cursor.queue.queue_id)
        .with_field("commitOffset", cursor.offset);
    pool.invoke(&cursor.addr, request).await?.into_success()?;
    cursor.committed = cursor.offset;
    Ok(())
}

async fn commit_all(pool: &RemotingPool, group: &str, cursors: &mut [Cursor]) {
    for cursor in cursors.iter_mut() {
        if let Err(e) = commit(pool, group, cursor).await {
            warn!(
                topic = %cursor.queue.topic,
                queue_id = cursor.queue.queue_id,
                error = %e,
                "Offset commit failed"
            );
        }
    }
}

impl RemotingConsumer {
    fn snapshot(&self) -> MqResult<(Arc<Session>, Arc<Assignment>)> {
        let state = self.state.read();
        let session = state.session.clone().ok_or_else(|| not_connected(FAMILY))?;
        let assignment = state
            .assignment
            .clone()
            .ok_or_else(|| MqError::subscription("consumer not subscribed to any topic"))?;
        Ok((session, assignment))
    }

    async fn open_cursors(session: &Session, assignment: &Assignment) -> MqResult<Vec<Cursor>> {
        let pool = &session.pool;
        let mut cursors = Vec::with_capacity(assignment.queues.len());
        for (queue, addr) in &assignment.queues {
            let offset = match committed_offset(pool, addr, &assignment.group, queue).await? {
                Some(offset) => offset,
                None if assignment.from_beginning => {
                    queue_offset(pool, addr, request_code::GET_MIN_OFFSET, queue).await?
                }
                None => queue_offset(pool, addr, request_code::GET_MAX_OFFSET, queue).await?,
            };
            debug!(topic = %queue.topic, queue_id = queue.queue_id, offset, "Queue cursor opened");
            cursors.push(Cursor {
                queue: queue.clone(),
                addr: addr.clone(),
                offset,
                committed: offset,
            });
        }
        Ok(cursors)
    }

    async fn pull(
        session: &Session,
        group: &str,
        cursor: &Cursor,
        handler: &MessageHandler,
    ) -> MqResult<Pulled> {
        let request = RemotingCommand::request(request_code::PULL_MESSAGE)
            .with_field("consumerGroup", group)
            .with_field("topic", &cursor.queue.topic)
            .with_field("queueId", cursor.queue.queue_id)
            .with_field("queueOffset", cursor.offset)
            .with_field("maxMsgNums", session.settings.pull_batch_size)
            .with_field("sysFlag", FLAG_SUBSCRIPTION)
            .with_field("commitOffset", 0)
            .with_field("suspendTimeoutMillis", 0)
            .with_field("subscription", SUBSCRIBE_ALL)
            .with_field("subVersion", 0)
            .with_field("expressionType", "TAG");
        let response = session.pool.invoke(&cursor.addr, request).await?;
        let next = response.field_i64("nextBeginOffset").ok();

        match response.code() {
            response_code::SUCCESS => {
                let messages = match response.body.clone().map(decode_messages).transpose() {
                    Ok(messages) => messages.unwrap_or_default(),
                    Err(e) if e.is_record_corrupt() => {
                        // Step over the batch so one bad record cannot stall the queue.
                        let next = next.unwrap_or(cursor.offset + 1);
                        warn!(
                            topic = %cursor.queue.topic,
                            queue_id = cursor.queue.queue_id,
                            from = cursor.offset,
                            to = next,
                            error = %e,
                            "Skipping undecodable messages"
                        );
                        return Ok(Pulled::Skipped { next });
                    }
                    Err(e) => return Err(e.into()),
                };
                let count = messages.len();
                let last = messages.last().map(|m| m.queue_offset + 1);
                for stored in messages {
                    if let Err(e) = handler(stored.into_message()).await {
                        warn!(topic = %cursor.queue.topic, error = %e, "Message handler failed");
                    }
                }
                let next = next.or(last).unwrap_or(cursor.offset);
                Ok(Pulled::Found { next, count })
            }
            response_code::PULL_NOT_FOUND | response_code::PULL_RETRY_IMMEDIATELY => Ok(Pulled::Empty { next }),
            response_code::PULL_OFFSET_MOVED => {
                debug!(topic = %cursor.queue.topic, queue_id = cursor.queue.queue_id, ?next, "Pull offset moved");
                Ok(Pulled::Empty { next })
            }
            _ => Err(response_error(&response)),
        }
    }
}

#[async_trait]
impl Lifecycle for RemotingConsumer {
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()> {
        ensure_broker_type(config, BrokerType::RocketMq)?;
        let settings = RemotingSettings::from_config(config)?;
        let pool = RemotingPool::new(settings.timeout, settings.signer.clone());
        pool.get(&settings.namesrv_addr).await?;
        info!(namesrv = %settings.namesrv_addr, "Remoting consumer connected");

        let session = Arc::new(Session {
            config: config.clone(),
            settings,
            pool,
        });
        let previous = {
            let mut state = self.state.write();
            state.assignment = None;
            state.session.replace(session)
        };
        if let Some(previous) = previous {
            previous.pool.close_all().await;
        }
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        let session = {
            let mut state = self.state.write();
            state.assignment = None;
            state.session.take()
        };
        if let Some(session) = session {
            session.pool.close_all().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.read().session.is_some()
    }
}

#[async_trait]
impl Consumer for RemotingConsumer {
    async fn subscribe(&self, request: &ConsumeRequest) -> MqResult<()> {
        validate_topics(&request.topics)?;
        let session = self.state.read().session.clone().ok_or_else(|| not_connected(FAMILY))?;
        let group = request.resolve_group_id(&session.config);

        let mut queues = Vec::new();
        for topic in &request.topics {
            let route = require_route(&session.pool, &session.settings.namesrv_addr, topic)
                .await
                .map_err(|e| {
                    MqError::subscription(format!("failed to subscribe to topic {}", topic))
                        .with_details(e.to_string())
                })?;
            for queue in route.read_queues(topic) {
                if let Some(addr) = route.master_addr(&queue.broker_name) {
                    queues.push((queue.clone(), addr.to_string()));
                }
            }
        }
        if queues.is_empty() {
            return Err(MqError::subscription("subscribed topics have no readable queue")
                .with_details(request.topics.join(",")));
        }

        info!(group = %group, topics = ?request.topics, queues = queues.len(), "Remoting consumer subscribed");
        self.state.write().assignment = Some(Arc::new(Assignment {
            group,
            queues,
            from_beginning: request.from_beginning,
            auto_commit: request.auto_commit,
        }));
        Ok(())
    }

    /// Pulls until cancelled, then commits offsets and tears the connections down.
    async fn consume(&self, cancel: CancellationToken, handler: MessageHandler) -> MqResult<()> {
        let (session, assignment) = self.snapshot()?;
        let mut cursors = Self::open_cursors(&session, &assignment).await?;
        let group = assignment.group.as_str();
        let mut last_commit = Instant::now();

        let outcome = 'pulling: loop {
            let mut found = 0usize;
            for cursor in cursors.iter_mut() {
                if cancel.is_cancelled() {
                    break 'pulling Ok(());
                }
                match Self::pull(&session, group, cursor, &handler).await {
                    Ok(Pulled::Found { next, count }) => {
                        cursor.offset = next;
                        found += count;
                    }
                    Ok(Pulled::Skipped { next }) => cursor.offset = next,
                    Ok(Pulled::Empty { next }) => {
                        if let Some(next) = next {
                            cursor.offset = next;
                        }
                    }
                    Err(e) if is_fatal(&e) => break 'pulling Err(e),
                    Err(e) => {
                        warn!(topic = %cursor.queue.topic, queue_id = cursor.queue.queue_id, error = %e, "Pull failed");
                    }
                }
            }

            if assignment.auto_commit && last_commit.elapsed() >= session.settings.commit_interval {
                commit_all(&session.pool, group, &mut cursors).await;
                last_commit = Instant::now();
            }

            if found == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break 'pulling Ok(()),
                    _ = tokio::time::sleep(session.settings.poll_interval) => {}
                }
            }
        };

        if assignment.auto_commit {
            commit_all(&session.pool, group, &mut cursors).await;
        }
        session.pool.close_all().await;
        debug!(group, "Remoting consumer shut down");
        outcome
    }
}
