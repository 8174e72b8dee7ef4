//! Connection cache: at most one live client per connection id.

use crate::config::CoreConfig;
use crate::factory::AdapterFactory;
use crate::ports::Client;
use shared_types::utils::format_duration;
use shared_types::{ConnectionConfig, MqError, MqResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lazily created, reused clients keyed by connection id.
///
/// One async mutex covers lookup, creation and store, so concurrent callers
/// for the same id never race to build two clients.
pub struct ConnectionCache {
    factory: Arc<dyn AdapterFactory>,
    clients: Mutex<HashMap<String, Arc<dyn Client>>>,
    connect_timeout: Duration,
}

impl ConnectionCache {
    pub fn new(factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
            connect_timeout: CoreConfig::default().connect_timeout(),
        }
    }

    /// Bound each `connect` of a freshly built client.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Return the cached client if it is still connected, otherwise build,
    /// connect and cache a new one.
    ///
    /// A stale entry is evicted and closed. A client that fails to connect,
    /// or does not finish connecting within the connect timeout, is closed
    /// before the error is returned.
    pub async fn get_or_create(&self, id: &str, config: &ConnectionConfig) -> MqResult<Arc<dyn Client>> {
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(id) {
            if client.is_connected() {
                return Ok(client.clone());
            }
        }

        if let Some(stale) = clients.remove(id) {
            debug!(connection_id = id, "Evicting disconnected client");
            if let Err(e) = stale.close().await {
                warn!(connection_id = id, error = %e, "Failed to close stale client");
            }
        }

        let client = self.factory.create_client(config.broker_type)?;
        let connected = tokio::time::timeout(self.connect_timeout, client.connect(config))
            .await
            .unwrap_or_else(|_| {
                Err(MqError::timeout("connect timed out").with_details(format!(
                    "{} after {}",
                    config.address(),
                    format_duration(self.connect_timeout)
                )))
            });
        if let Err(e) = connected {
            if let Err(close_err) = client.close().await {
                warn!(connection_id = id, error = %close_err, "Failed to close half-built client");
            }
            return Err(e);
        }

        info!(
            connection_id = id,
            broker_type = %config.broker_type,
            address = %config.address(),
            "Client connected"
        );
        clients.insert(id.to_string(), client.clone());
        Ok(client)
    }

    /// Remove and close the client for `id`. Unknown ids are ignored.
    pub async fn close(&self, id: &str) -> MqResult<()> {
        let removed = self.clients.lock().await.remove(id);
        match removed {
            Some(client) => {
                debug!(connection_id = id, "Closing cached client");
                client.close().await
            }
            None => Ok(()),
        }
    }

    /// Close every cached client. Failures are logged.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<dyn Client>)> = self.clients.lock().await.drain().collect();
        for (id, client) in drained {
            if let Err(e) = client.close().await {
                warn!(connection_id = %id, error = %e, "Failed to close client during shutdown");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.clients.lock().await.contains_key(id)
    }
}
