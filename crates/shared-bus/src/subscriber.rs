//! # Event Subscriber
//!
//! Receiving side of the bus. A [`Subscription`] only yields events its
//! [`EventFilter`] accepts; events that did not match are skipped silently.
//!
//! A subscriber that falls more than the channel capacity behind loses the
//! oldest events. The loss is counted in [`Subscription::lagged`] rather than
//! surfaced as an error, so a slow host UI never stops the consume loops.

use crate::events::{EventFilter, MqEvent};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Event bus closed")]
    Closed,
}

/// Filtered receiver handed out by [`crate::InMemoryEventBus::subscribe`].
pub struct Subscription {
    receiver: broadcast::Receiver<MqEvent>,
    filter: EventFilter,
    lagged: u64,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<MqEvent>, filter: EventFilter) -> Self {
        Self {
            receiver,
            filter,
            lagged: 0,
        }
    }

    /// Wait for the next accepted event; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<MqEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => self.note_lag(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Self::recv`]. `Ok(None)` means nothing
    /// accepted is queued right now.
    pub fn try_recv(&mut self) -> Result<Option<MqEvent>, SubscriptionError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Ok(Some(event)),
                Ok(_) => {}
                Err(TryRecvError::Lagged(missed)) => self.note_lag(missed),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Closed) => return Err(SubscriptionError::Closed),
            }
        }
    }

    /// Events dropped because this subscriber fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    fn note_lag(&mut self, missed: u64) {
        self.lagged += missed;
        debug!(missed, total = self.lagged, "Subscriber lagged behind the bus");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTopic;
    use crate::publisher::{EventSink, InMemoryEventBus};
    use shared_types::Message;
    use std::time::Duration;
    use tokio::time::timeout;

    fn received(sub: &str) -> MqEvent {
        MqEvent::message_received(sub, Message::builder("orders").build())
    }

    #[tokio::test]
    async fn test_recv_returns_emitted_event() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());

        bus.emit(received("s1")).await;

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(event.name(), "message:received");
    }

    #[tokio::test]
    async fn test_filter_skips_other_topics() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::topics(vec![EventTopic::ConsumerError]));

        bus.emit(received("s1")).await;
        bus.emit(MqEvent::consumer_error("s1", "boom")).await;

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert!(matches!(event, MqEvent::ConsumerError { .. }));
        assert!(matches!(sub.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_dropping_subscriptions_detaches_them() {
        let bus = InMemoryEventBus::new();
        {
            let _a = bus.subscribe(EventFilter::all());
            let _b = bus.subscribe(EventFilter::all());
            assert_eq!(bus.subscriber_count(), 2);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lag_is_counted_not_fatal() {
        let bus = InMemoryEventBus::with_capacity(2);
        let mut sub = bus.subscribe(EventFilter::all());
        for i in 0..5 {
            bus.emit(received(&format!("s{}", i))).await;
        }

        let first = sub.try_recv().unwrap().expect("event after lag");
        assert_eq!(first.subscription_id(), "s3");
        assert_eq!(sub.lagged(), 3);
    }
}
