//! Read-only client for the broker's management HTTP API.

use super::session::AmqpSettings;
use reqwest::Url;
use serde::Deserialize;
use shared_types::{MqError, MqResult};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    #[serde(default)]
    pub vhost: String,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub consumers: u64,
}

pub(crate) struct ManagementClient {
    http: reqwest::Client,
    url: Url,
    username: String,
    password: String,
}

/// `http://host:<management port>/api/queues/<vhost>`, vhost percent-encoded.
pub(crate) fn queues_url(settings: &AmqpSettings) -> MqResult<Url> {
    let base = format!("http://{}:{}/", settings.host, settings.management_port);
    let mut url = Url::parse(&base)
        .map_err(|e| MqError::config("invalid management API address").with_details(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| MqError::config("management API address cannot take a path"))?
        .pop_if_empty()
        .extend(["api", "queues", settings.vhost.as_str()]);
    Ok(url)
}

impl ManagementClient {
    pub fn new(settings: &AmqpSettings) -> MqResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MqError::config("failed to build HTTP client").with_details(e.to_string()))?;
        Ok(Self {
            http,
            url: queues_url(settings)?,
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    pub async fn list_queues(&self) -> MqResult<Vec<QueueInfo>> {
        let response = self
            .http
            .get(self.url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| MqError::network("failed to call management API").with_details(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MqError::network("management API returned an error")
                .with_details(format!("status {}", status)));
        }
        response
            .json::<Vec<QueueInfo>>()
            .await
            .map_err(|e| MqError::network("failed to parse management API response").with_details(e.to_string()))
    }
}
