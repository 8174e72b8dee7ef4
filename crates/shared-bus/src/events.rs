//! # Event Definitions
//!
//! Events the messaging core emits towards its host (a UI, a log shipper,
//! a test harness). The wire names are stable: `message:received` and
//! `consumer:error`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_types::Message;

/// Wire name of a received-message event.
pub const MESSAGE_RECEIVED: &str = "message:received";

/// Wire name of an abnormal consume-loop termination.
pub const CONSUMER_ERROR: &str = "consumer:error";

/// Event emitted by the messaging core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload")]
pub enum MqEvent {
    /// One message delivered by a running subscription.
    #[serde(rename = "message:received")]
    MessageReceived {
        subscription_id: String,
        message: Message,
    },

    /// A consume loop ended with a genuine failure.
    #[serde(rename = "consumer:error")]
    ConsumerError {
        subscription_id: String,
        error: String,
    },
}

impl MqEvent {
    pub fn message_received(subscription_id: impl Into<String>, message: Message) -> Self {
        MqEvent::MessageReceived {
            subscription_id: subscription_id.into(),
            message,
        }
    }

    pub fn consumer_error(subscription_id: impl Into<String>, error: impl Into<String>) -> Self {
        MqEvent::ConsumerError {
            subscription_id: subscription_id.into(),
            error: error.into(),
        }
    }

    /// Stable event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            MqEvent::MessageReceived { .. } => MESSAGE_RECEIVED,
            MqEvent::ConsumerError { .. } => CONSUMER_ERROR,
        }
    }

    /// Topic used for filtering.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            MqEvent::MessageReceived { .. } => EventTopic::MessageReceived,
            MqEvent::ConsumerError { .. } => EventTopic::ConsumerError,
        }
    }

    #[must_use]
    pub fn subscription_id(&self) -> &str {
        match self {
            MqEvent::MessageReceived { subscription_id, .. }
            | MqEvent::ConsumerError { subscription_id, .. } => subscription_id,
        }
    }

    /// JSON payload as delivered to the host: the message itself, or
    /// `{subscriptionId, error}`.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            MqEvent::MessageReceived { message, .. } => {
                serde_json::to_value(message).unwrap_or(Value::Null)
            }
            MqEvent::ConsumerError {
                subscription_id,
                error,
            } => json!({
                "subscriptionId": subscription_id,
                "error": error,
            }),
        }
    }
}

/// Event categories for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    MessageReceived,
    ConsumerError,
    /// Matches every event.
    All,
}

/// Filter applied by a bus subscription.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Subscription ids to include. Empty means every subscription.
    pub subscription_ids: Vec<String>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            subscription_ids: Vec::new(),
        }
    }

    /// Create a filter for events of one consume loop.
    #[must_use]
    pub fn for_subscription(subscription_id: impl Into<String>) -> Self {
        Self {
            topics: Vec::new(),
            subscription_ids: vec![subscription_id.into()],
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &MqEvent) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic());

        let subscription_match = self.subscription_ids.is_empty()
            || self
                .subscription_ids
                .iter()
                .any(|id| id == event.subscription_id());

        topic_match && subscription_match
    }
}
