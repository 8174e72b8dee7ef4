//! # Shared Bus - Event Bus for the Messaging Core
//!
//! The messaging core never talks to its host directly. Every received
//! message and every abnormal consume-loop termination is emitted through the
//! [`EventSink`] port.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Consume loop │                    │     Host     │
//! │              │      emit()        │  (UI, logs)  │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{EventFilter, EventTopic, MqEvent, CONSUMER_ERROR, MESSAGE_RECEIVED};
pub use publisher::{BusStats, EventSink, InMemoryEventBus, NoopEventSink};
pub use subscriber::{Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
