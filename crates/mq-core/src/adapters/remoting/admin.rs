use super::client::RemotingPool;
use super::protocol::{request_code, RemotingCommand};
use super::route::{fetch_cluster_info, fetch_route, fetch_topic_list, AUTO_CREATE_TOPIC};
use super::settings::RemotingSettings;
use super::FAMILY;
use crate::adapters::{ensure_broker_type, not_connected, validate_topic};
use crate::ports::{Admin, Lifecycle};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use shared_types::{BrokerType, ConnectionConfig, ConsumerGroup, MqResult, TestResult, TopicInfo};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_QUEUE_NUMS: i32 = 8;
const PERM_READ_WRITE: i32 = 6;

struct Session {
    settings: RemotingSettings,
    pool: RemotingPool,
}

/// Topic administration against the name server and one broker.
#[derive(Default)]
pub struct RemotingAdmin {
    session: RwLock<Option<Arc<Session>>>,
}

pub(crate) fn create_topic_request(name: &str, partitions: i32) -> RemotingCommand {
    let queues = if partitions < 1 { DEFAULT_QUEUE_NUMS } else { partitions };
    RemotingCommand::request(request_code::UPDATE_AND_CREATE_TOPIC)
        .with_field("topic", name)
        .with_field("defaultTopic", AUTO_CREATE_TOPIC)
        .with_field("readQueueNums", queues)
        .with_field("writeQueueNums", queues)
        .with_field("perm", PERM_READ_WRITE)
        .with_field("topicFilterType", "SINGLE_TAG")
        .with_field("topicSysFlag", 0)
        .with_field("order", false)
}

impl RemotingAdmin {
    fn session(&self) -> MqResult<Arc<Session>> {
        self.session.read().clone().ok_or_else(|| not_connected(FAMILY))
    }

    async fn topic_info(session: &Session, name: String) -> TopicInfo {
        let partitions = match fetch_route(&session.pool, &session.settings.namesrv_addr, &name).await {
            Ok(Some(route)) => route.queue_count(),
            Ok(None) => 0,
            Err(e) => {
                debug!(topic = %name, error = %e, "Route lookup failed; reporting no queues");
                0
            }
        };
        TopicInfo::new(name, partitions, 1)
    }
}

#[async_trait]
impl Lifecycle for RemotingAdmin {
    async fn connect(&self, config: &ConnectionConfig) -> MqResult<()> {
        ensure_broker_type(config, BrokerType::RocketMq)?;
        let settings = RemotingSettings::from_config(config)?;
        let pool = RemotingPool::new(settings.timeout, settings.signer.clone());
        pool.get(&settings.namesrv_addr).await?;
        info!(namesrv = %settings.namesrv_addr, broker = %settings.broker_addr, "Remoting admin connected");

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
impl Admin for RemotingAdmin {
    async fn test_connection(&self) -> TestResult {
        let started = Instant::now();
        let Ok(session) = self.session() else {
            return TestResult::failed("Not connected to RocketMQ", started);
        };
        match fetch_cluster_info(&session.pool, &session.settings.namesrv_addr).await {
            Ok(info) if info.master_addrs().is_empty() => TestResult::failed(
                "Failed to connect to RocketMQ: no broker registered with the name server",
                started,
            ),
            Ok(_) => TestResult::ok("Connected successfully to RocketMQ", started),
            Err(e) => TestResult::failed(format!("Failed to connect to RocketMQ: {}", e), started),
        }
    }

    async fn list_topics(&self) -> MqResult<Vec<TopicInfo>> {
        let session = self.session()?;
        let list = fetch_topic_list(&session.pool, &session.settings.namesrv_addr).await?;
        let lookups = list
            .topic_list
            .into_iter()
            .map(|name| Self::topic_info(&session, name));
        Ok(join_all(lookups).await)
    }

    /// Non-positive `partitions` falls back to eight queues. Replicas are a
    /// broker deployment concern and are ignored.
    async fn create_topic(&self, name: &str, partitions: i32, _replicas: i16) -> MqResult<()> {
        validate_topic(name)?;
        let session = self.session()?;
        let broker = &session.settings.broker_addr;
        session
            .pool
            .invoke(broker, create_topic_request(name, partitions))
            .await?
            .into_success()?;
        info!(topic = name, broker = %broker, "Created topic");
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> MqResult<()> {
        validate_topic(name)?;
        let session = self.session()?;
        let on_broker = RemotingCommand::request(request_code::DELETE_TOPIC_IN_BROKER).with_field("topic", name);
        session
            .pool
            .invoke(&session.settings.broker_addr, on_broker)
            .await?
            .into_success()?;
        let on_namesrv = RemotingCommand::request(request_code::DELETE_TOPIC_IN_NAMESRV).with_field("topic", name);
        session
            .pool
            .invoke(&session.settings.namesrv_addr, on_namesrv)
            .await?
            .into_success()?;
        info!(topic = name, "Deleted topic");
        Ok(())
    }

    async fn list_consumer_groups(&self) -> MqResult<Vec<ConsumerGroup>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::super::client::tests::spawn_peer;
    use super::super::protocol::response_code;
    use super::*;
    use parking_lot::Mutex;
    use shared_types::ErrorKind;

    const ROUTE: &str = r#"{"brokerDatas":[{"brokerAddrs":{0:"127.0.0.1:1"},"brokerName":"b","cluster":"c"}],"queueDatas":[{"brokerName":"b","perm":6,"readQueueNums":4,"writeQueueNums":4}]}"#;
    const CLUSTER: &str = r#"{"brokerAddrTable":{"b":{"brokerAddrs":{0:"127.0.0.1:1"},"brokerName":"b","cluster":"c"}},"clusterAddrTable":{"c":["b"]}}"#;

    fn ok() -> RemotingCommand {
        RemotingCommand::response(response_code::SUCCESS, 0)
    }

    /// Name server plus broker in one peer; records the request codes it saw.
    async fn connected_admin(seen: Arc<Mutex<Vec<i32>>>) -> RemotingAdmin {
        let peer = spawn_peer(move |req| {
            seen.lock().push(req.code());
            match req.code() {
                request_code::GET_BROKER_CLUSTER_INFO => Some(ok().with_body(CLUSTER.as_bytes().to_vec())),
                request_code::GET_ALL_TOPIC_LIST_FROM_NAMESERVER => {
                    Some(ok().with_body(r#"{"topicList":["orders","audit"]}"#.as_bytes().to_vec()))
                }
                request_code::GET_ROUTEINFO_BY_TOPIC if req.field("topic") == Some("orders") => {
                    Some(ok().with_body(ROUTE.as_bytes().to_vec()))
                }
                request_code::GET_ROUTEINFO_BY_TOPIC => {
                    Some(RemotingCommand::response(response_code::TOPIC_NOT_EXIST, 0))
                }
                request_code::UPDATE_AND_CREATE_TOPIC if req.field("topic") == Some("denied") => Some(
                    RemotingCommand::response(response_code::NO_PERMISSION, 0).with_remark("no permission"),
                ),
                _ => Some(ok()),
            }
        })
        .await;
        let (host, port) = peer.rsplit_once(':').unwrap();
        let config = ConnectionConfig::new("rmq", BrokerType::RocketMq, host, port.parse().unwrap())
            .with_extra("broker_addr", peer.clone());
        let admin = RemotingAdmin::default();
        admin.connect(&config).await.unwrap();
        admin
    }

    #[test]
    fn test_create_request_defaults_queue_count() {
        let cmd = create_topic_request("orders", 0);
        assert_eq!(cmd.field("readQueueNums"), Some("8"));
        assert_eq!(cmd.field("writeQueueNums"), Some("8"));
        assert_eq!(create_topic_request("orders", 3).field("writeQueueNums"), Some("3"));
    }

    #[tokio::test]
    async fn test_unconnected_probe() {
        let result = RemotingAdmin::default().test_connection().await;
        assert!(!result.success);
        assert_eq!(result.message, "Not connected to RocketMQ");
    }

    #[tokio::test]
    async fn test_probe_and_listing() {
        let admin = connected_admin(Arc::new(Mutex::new(Vec::new()))).await;
        let result = admin.test_connection().await;
        assert!(result.success, "{}", result.message);

        let topics = admin.list_topics().await.unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].name, "audit");
        assert_eq!(topics[0].partitions, 0);
        assert_eq!(topics[1].name, "orders");
        assert_eq!(topics[1].partitions, 4);
        assert!(admin.list_consumer_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_hits_broker_then_name_server() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let admin = connected_admin(seen.clone()).await;
        admin.delete_topic("orders").await.unwrap();
        assert_eq!(
            *seen.lock(),
            vec![request_code::DELETE_TOPIC_IN_BROKER, request_code::DELETE_TOPIC_IN_NAMESRV]
        );
    }

    #[tokio::test]
    async fn test_create_surfaces_broker_refusal() {
        let admin = connected_admin(Arc::new(Mutex::new(Vec::new()))).await;
        admin.create_topic("orders", 4, 1).await.unwrap();
        let err = admin.create_topic("denied", 4, 1).await.unwrap_err();
        assert!(err.is_kind(ErrorKind::Auth));
        assert!(admin.create_topic("bad topic!", 1, 1).await.unwrap_err().is_kind(ErrorKind::Validation));
    }
}
