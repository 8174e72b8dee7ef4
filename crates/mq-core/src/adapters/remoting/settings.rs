use super::acl::AclSigner;
use shared_types::utils::parse_duration;
use shared_types::{ConnectionConfig, MqError, MqResult};
use std::time::Duration;

const DEFAULT_PRODUCER_GROUP: &str = "mq-toolkit-producer";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_PULL_BATCH: u32 = 32;
const DEFAULT_COMMIT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Name server 9876 sits 1035 below broker 10911 in a stock deployment.
const BROKER_PORT_OFFSET: u16 = 1035;

#[derive(Debug, Clone)]
pub struct RemotingSettings {
    pub namesrv_addr: String,
    /// Broker used for topic creation and deletion.
    pub broker_addr: String,
    pub producer_group: String,
    pub signer: Option<AclSigner>,
    pub timeout: Duration,
    pub pull_batch_size: u32,
    pub commit_interval: Duration,
    /// Wait between pulls that found nothing.
    pub poll_interval: Duration,
}

fn duration_extra(config: &ConnectionConfig, key: &str, default: Duration) -> MqResult<Duration> {
    match config.extra_value(key) {
        None => Ok(default),
        Some(raw) => parse_duration(raw).filter(|d| !d.is_zero()).ok_or_else(|| {
            MqError::config(format!("invalid value for extra parameter '{}'", key)).with_details(raw.to_string())
        }),
    }
}

impl RemotingSettings {
    pub fn from_config(config: &ConnectionConfig) -> MqResult<Self> {
        let broker_addr = match config.extra_value("broker_addr") {
            Some(addr) => addr.trim().to_string(),
            None => {
                let port = config.port.checked_add(BROKER_PORT_OFFSET).ok_or_else(|| {
                    MqError::config("cannot derive broker port; set extra parameter 'broker_addr'")
                        .with_details(config.port.to_string())
                })?;
                format!("{}:{}", config.host, port)
            }
        };

        Ok(Self {
            namesrv_addr: config.address(),
            broker_addr,
            producer_group: config
                .extra_value("producer_group")
                .unwrap_or(DEFAULT_PRODUCER_GROUP)
                .to_string(),
            signer: config
                .credentials()
                .map(|(access_key, secret_key)| AclSigner::new(access_key, secret_key)),
            timeout: config
                .extra_parse::<u64>("timeout_ms")?
                .filter(|v| *v > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TIMEOUT),
            pull_batch_size: config
                .extra_parse::<u32>("pull_batch_size")?
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_PULL_BATCH),
            commit_interval: duration_extra(config, "commit_interval", DEFAULT_COMMIT_INTERVAL)?,
            poll_interval: duration_extra(config, "poll_interval", DEFAULT_POLL_INTERVAL)?,
        })
    }
}
