//! # MQ Core
//!
//! One programming model over several message-broker families.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          MqService                                │
//! │   test_connection · produce · start/stop consuming · topics       │
//! ├───────────────────────┬──────────────────────────────────────────┤
//! │   ConnectionCache     │       SubscriptionOrchestrator            │
//! │  (one client per id)  │  (one task + cancel token per sub)        │
//! ├───────────────────────┴──────────────────────────────────────────┤
//! │                        AdapterFactory                             │
//! ├──────────────┬───────────────────────┬───────────────────────────┤
//! │    kafka     │         amqp          │         remoting          │
//! │  (rdkafka)   │  (lapin + mgmt HTTP)  │  (name server + codec)    │
//! └──────────────┴───────────────────────┴───────────────────────────┘
//!        │ ConfigStore          │ HistoryStore          │ EventSink
//!        ▼                      ▼                       ▼
//!                     host-supplied collaborators
//! ```
//!
//! ## Plug-and-Play Adapters
//!
//! Each broker family sits behind a cargo feature (`kafka`, `amqp`,
//! `remoting`). Requests for a family that is not compiled in fail with a
//! Config error naming the type.

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod cache;
pub mod config;
pub mod factory;
pub mod orchestrator;
pub mod ports;
pub mod service;
pub mod stores;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cache::ConnectionCache;
pub use config::CoreConfig;
pub use factory::{
    parse_and_create_admin, parse_and_create_client, parse_and_create_consumer,
    parse_and_create_producer, AdapterFactory, DefaultAdapterFactory,
};
pub use orchestrator::{SubscriptionInfo, SubscriptionOrchestrator};
pub use ports::{
    handler_fn, Admin, Client, ConfigStore, Consumer, EventSink, HistoryStore, Lifecycle,
    MessageHandler, Producer,
};
pub use service::{MqService, MqServiceBuilder};
pub use stores::{InMemoryConfigStore, InMemoryHistoryStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
