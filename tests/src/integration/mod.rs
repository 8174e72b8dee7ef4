//! Integration tests across service, cache, orchestrator and adapters.

pub mod cache;
pub mod flows;
pub mod unreachable;
pub mod validation;

use mq_core::testing::{MockFactory, MockPlan};
use mq_core::{InMemoryConfigStore, InMemoryHistoryStore, MqService};
use shared_bus::InMemoryEventBus;
use shared_types::{BrokerType, ConnectionConfig};
use std::sync::Arc;

/// Service over a mock broker with one connection, id `c1`.
pub struct Harness {
    pub service: MqService,
    pub factory: Arc<MockFactory>,
    pub bus: Arc<InMemoryEventBus>,
    pub history: Arc<InMemoryHistoryStore>,
}

pub fn connection(id: &str, broker: BrokerType, host: &str, port: u16) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(id, broker, host, port);
    config.id = id.to_string();
    config
}

pub fn harness(plan: MockPlan) -> Harness {
    let factory = Arc::new(MockFactory::new(plan));
    let bus = Arc::new(InMemoryEventBus::new());
    let history = Arc::new(InMemoryHistoryStore::new(100));
    let store = InMemoryConfigStore::with_connections([connection("c1", BrokerType::Kafka, "localhost", 9092)])
        .expect("seed config store");
    let service = MqService::builder()
        .factory(factory.clone())
        .config_store(Arc::new(store))
        .history_store(history.clone())
        .event_sink(bus.clone())
        .build()
        .expect("build service");
    Harness {
        service,
        factory,
        bus,
        history,
    }
}
