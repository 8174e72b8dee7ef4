use crate::ports::ConfigStore;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use shared_types::{generate_id, BrokerType, ConnectionConfig, MqError, MqResult};
use std::collections::HashMap;

/// Connection configs held in a map. Names are unique.
#[derive(Default)]
pub struct InMemoryConfigStore {
    connections: RwLock<HashMap<String, ConnectionConfig>>,
}

fn duplicate_name(name: &str) -> MqError {
    MqError::validation(format!("connection name already exists: {}", name))
}

fn missing(id: &str) -> MqError {
    MqError::not_found(format!("connection not found: {}", id))
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, keeping the ids the configs already carry.
    pub fn with_connections(configs: impl IntoIterator<Item = ConnectionConfig>) -> MqResult<Self> {
        let store = Self::default();
        {
            let mut map = store.connections.write();
            for config in configs {
                if map.values().any(|c| c.name == config.name) {
                    return Err(duplicate_name(&config.name));
                }
                map.insert(config.id.clone(), config);
            }
        }
        Ok(store)
    }

    /// Store a new config under a freshly generated id, which is returned.
    pub fn create(&self, mut config: ConnectionConfig) -> MqResult<String> {
        let mut map = self.connections.write();
        if map.values().any(|c| c.name == config.name) {
            return Err(duplicate_name(&config.name));
        }
        let now = Utc::now();
        config.id = generate_id();
        config.created = now;
        config.updated = now;
        let id = config.id.clone();
        map.insert(id.clone(), config);
        Ok(id)
    }

    pub fn update(&self, mut config: ConnectionConfig) -> MqResult<()> {
        let mut map = self.connections.write();
        let created = map.get(&config.id).map(|c| c.created).ok_or_else(|| missing(&config.id))?;
        if map.values().any(|c| c.name == config.name && c.id != config.id) {
            return Err(duplicate_name(&config.name));
        }
        config.created = created;
        config.updated = Utc::now();
        map.insert(config.id.clone(), config);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> MqResult<()> {
        self.connections.write().remove(id).map(|_| ()).ok_or_else(|| missing(id))
    }

    /// Every config, oldest first.
    pub fn list(&self) -> Vec<ConnectionConfig> {
        let mut configs: Vec<_> = self.connections.read().values().cloned().collect();
        configs.sort_by_key(|c| c.created);
        configs
    }

    pub fn list_by_type(&self, broker: BrokerType) -> Vec<ConnectionConfig> {
        self.list().into_iter().filter(|c| c.broker_type == broker).collect()
    }

    pub fn get(&self, id: &str) -> MqResult<ConnectionConfig> {
        self.connections.read().get(id).cloned().ok_or_else(|| missing(id))
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get_connection(&self, id: &str) -> MqResult<ConnectionConfig> {
        self.get(id)
    }
}
