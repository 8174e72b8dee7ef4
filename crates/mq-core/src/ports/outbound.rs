//! Outbound (Driven) ports for the messaging core.
//!
//! These traits define the collaborators the core needs but does not own:
//! where connection configs live, where outcomes are recorded, and where
//! events go ([`EventSink`], re-exported from `shared-bus`).

use async_trait::async_trait;
use shared_types::{ConnectionConfig, MqResult};

pub use shared_bus::EventSink;

/// Resolves connection configs by id.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// NotFound when no connection carries this id.
    async fn get_connection(&self, id: &str) -> MqResult<ConnectionConfig>;
}

/// Records produce, consume and test outcomes.
///
/// Callers log failures of these methods and carry on.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record_produce(
        &self,
        connection_id: &str,
        topic: &str,
        success: bool,
        message: &str,
        latency_ms: u64,
    ) -> MqResult<()>;

    async fn record_consume(
        &self,
        connection_id: &str,
        topic: &str,
        success: bool,
        message: &str,
        latency_ms: u64,
    ) -> MqResult<()>;

    async fn record_test(
        &self,
        connection_id: &str,
        success: bool,
        message: &str,
        latency_ms: u64,
    ) -> MqResult<()>;
}
