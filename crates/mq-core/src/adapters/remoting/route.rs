//! Name-server data: topic routes, cluster layout, topic lists.

use super::client::RemotingPool;
use super::protocol::{request_code, response_code, RemotingCommand};
use serde::Deserialize;
use shared_types::{MqError, MqResult};
use std::collections::{BTreeSet, HashMap};

/// Broker id of a master node.
pub const MASTER_ID: &str = "0";
/// Route used before a topic exists; the broker auto-creates on first send.
pub const AUTO_CREATE_TOPIC: &str = "TBW102";

const PERM_WRITE: i32 = 1 << 1;
const PERM_READ: i32 = 1 << 2;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerData {
    #[serde(default)]
    pub cluster: String,
    pub broker_name: String,
    /// Broker id to address; id 0 is the master.
    #[serde(default)]
    pub broker_addrs: HashMap<String, String>,
}

impl BrokerData {
    pub fn master_addr(&self) -> Option<&str> {
        self.broker_addrs.get(MASTER_ID).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueData {
    pub broker_name: String,
    pub read_queue_nums: i32,
    pub write_queue_nums: i32,
    pub perm: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRouteData {
    #[serde(default)]
    pub broker_datas: Vec<BrokerData>,
    #[serde(default)]
    pub queue_datas: Vec<QueueData>,
}

/// One queue of a topic on one broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageQueue {
    pub topic: String,
    pub broker_name: String,
    pub queue_id: i32,
}

impl TopicRouteData {
    pub fn master_addr(&self, broker_name: &str) -> Option<&str> {
        self.broker_datas
            .iter()
            .find(|b| b.broker_name == broker_name)
            .and_then(BrokerData::master_addr)
    }

    fn queues(&self, topic: &str, perm: i32, count: impl Fn(&QueueData) -> i32) -> Vec<MessageQueue> {
        let mut queues: Vec<MessageQueue> = self
            .queue_datas
            .iter()
            .filter(|q| q.perm & perm != 0 && self.master_addr(&q.broker_name).is_some())
            .flat_map(|q| {
                (0..count(q).max(0)).map(move |queue_id| MessageQueue {
                    topic: topic.to_string(),
                    broker_name: q.broker_name.clone(),
                    queue_id,
                })
            })
            .collect();
        queues.sort();
        queues
    }

    /// Writable queues on brokers with a reachable master.
    pub fn write_queues(&self, topic: &str) -> Vec<MessageQueue> {
        self.queues(topic, PERM_WRITE, |q| q.write_queue_nums)
    }

    pub fn read_queues(&self, topic: &str) -> Vec<MessageQueue> {
        self.queues(topic, PERM_READ, |q| q.read_queue_nums)
    }

    /// Total read queues across brokers.
    pub fn queue_count(&self) -> i32 {
        self.queue_datas.iter().map(|q| q.read_queue_nums.max(0)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    #[serde(default)]
    pub broker_addr_table: HashMap<String, BrokerData>,
    #[serde(default)]
    pub cluster_addr_table: HashMap<String, BTreeSet<String>>,
}

impl ClusterInfo {
    pub fn master_addrs(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self
            .broker_addr_table
            .values()
            .filter_map(|b| b.master_addr().map(str::to_string))
            .collect();
        addrs.sort();
        addrs
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicList {
    #[serde(default)]
    pub topic_list: BTreeSet<String>,
}

/// `Ok(None)` when the name server knows no such topic.
pub async fn fetch_route(pool: &RemotingPool, namesrv: &str, topic: &str) -> MqResult<Option<TopicRouteData>> {
    let request = RemotingCommand::request(request_code::GET_ROUTEINFO_BY_TOPIC).with_field("topic", topic);
    let response = pool.invoke(namesrv, request).await?;
    if response.code() == response_code::TOPIC_NOT_EXIST {
        return Ok(None);
    }
    let route: TopicRouteData = response.into_success()?.decode_body()?;
    Ok(Some(route))
}

/// Route for a topic, or an error naming it when absent.
pub async fn require_route(pool: &RemotingPool, namesrv: &str, topic: &str) -> MqResult<TopicRouteData> {
    fetch_route(pool, namesrv, topic)
        .await?
        .ok_or_else(|| MqError::not_found("no route for topic").with_details(topic.to_string()))
}

pub async fn fetch_cluster_info(pool: &RemotingPool, namesrv: &str) -> MqResult<ClusterInfo> {
    let request = RemotingCommand::request(request_code::GET_BROKER_CLUSTER_INFO);
    pool.invoke(namesrv, request).await?.into_success()?.decode_body()
}

pub async fn fetch_topic_list(pool: &RemotingPool, namesrv: &str) -> MqResult<TopicList> {
    let request = RemotingCommand::request(request_code::GET_ALL_TOPIC_LIST_FROM_NAMESERVER);
    pool.invoke(namesrv, request).await?.into_success()?.decode_body()
}
