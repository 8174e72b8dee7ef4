//! # Event Publisher
//!
//! The [`EventSink`] port the messaging core emits into, plus two sinks: a
//! broadcast bus for hosts that listen, and a no-op sink for hosts that don't.

use crate::events::{EventFilter, MqEvent};
use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Port through which the messaging core reports events to its host.
///
/// Emission is fire-and-forget: a sink never fails the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: MqEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: MqEvent) {}
}

/// Point-in-time counters of an [`InMemoryEventBus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Events handed to `emit`.
    pub emitted: u64,
    /// Events nobody was subscribed to receive.
    pub unheard: u64,
    pub subscribers: usize,
}

/// Broadcast event bus: every live [`Subscription`] sees every event,
/// subject to its own filter.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<MqEvent>,
    capacity: usize,
    emitted: AtomicU64,
    unheard: AtomicU64,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// `capacity` is how far a subscriber may fall behind before it starts
    /// losing the oldest events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            emitted: AtomicU64::new(0),
            unheard: AtomicU64::new(0),
        }
    }

    /// Events emitted before this call are not replayed.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        debug!(topics = ?filter.topics, subscription_ids = ?filter.subscription_ids, "Event subscription added");
        Subscription::new(self.sender.subscribe(), filter)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            unheard: self.unheard.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for InMemoryEventBus {
    async fn emit(&self, event: MqEvent) {
        let name = event.name();
        self.emitted.fetch_add(1, Ordering::Relaxed);
        if let Ok(receivers) = self.sender.send(event) {
            trace!(event = name, receivers, "Event emitted");
        } else {
            self.unheard.fetch_add(1, Ordering::Relaxed);
            trace!(event = name, "Event emitted with no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Message;

    fn event() -> MqEvent {
        MqEvent::message_received("s1", Message::builder("orders").build())
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_counted() {
        let bus = InMemoryEventBus::new();
        bus.emit(event()).await;
        assert_eq!(
            bus.stats(),
            BusStats {
                emitted: 1,
                unheard: 1,
                subscribers: 0
            }
        );
    }

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        bus.emit(event()).await;

        let stats = bus.stats();
        assert_eq!((stats.emitted, stats.unheard, stats.subscribers), (1, 0, 1));
        assert!(sub.try_recv().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_noop_sink_accepts_events() {
        NoopEventSink.emit(event()).await;
    }

    #[test]
    fn test_capacity_is_at_least_one() {
        assert_eq!(InMemoryEventBus::with_capacity(16).capacity(), 16);
        assert_eq!(InMemoryEventBus::with_capacity(0).capacity(), 1);
    }
}
