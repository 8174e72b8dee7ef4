//! Ports: capability interfaces implemented by the adapters, and the
//! outbound collaborators the core depends on.

pub mod capability;
pub mod outbound;

pub use capability::{handler_fn, Admin, Client, Consumer, Lifecycle, MessageHandler, Producer};
pub use outbound::{ConfigStore, EventSink, HistoryStore};
