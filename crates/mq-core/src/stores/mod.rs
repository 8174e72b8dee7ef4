//! In-memory collaborator implementations.
//!
//! Hosts with durable storage supply their own [`crate::ConfigStore`] and
//! [`crate::HistoryStore`]; these back the runtime binary and the tests.

mod config_store;
mod history_store;

pub use config_store::InMemoryConfigStore;
pub use history_store::InMemoryHistoryStore;
