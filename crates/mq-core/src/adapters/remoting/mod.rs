//! Remoting-broker adapter (name server plus brokers).
//!
//! Speaks the remoting wire protocol directly over TCP:
//!
//! | Layer      | Module     | Role                                         |
//! |------------|------------|----------------------------------------------|
//! | Framing    | `codec`    | length-prefixed JSON header plus raw body    |
//! | Transport  | `client`   | multiplexed connections, opaque correlation  |
//! | Auth       | `acl`      | HMAC-SHA1 request signing                    |
//! | Routing    | `route`    | topic routes and cluster data                |
//! | Store      | `message`  | properties and the stored-message format     |
//!
//! The connection's `host:port` is the name server. Topic creation and
//! deletion go to a broker; see [`RemotingSettings`] for how its address is
//! derived.

mod acl;
mod admin;
mod client;
mod codec;
mod consumer;
mod errors;
mod message;
mod producer;
mod protocol;
mod route;
mod settings;

pub use acl::AclSigner;
pub use admin::RemotingAdmin;
pub use consumer::RemotingConsumer;
pub use producer::RemotingProducer;
pub use settings::RemotingSettings;

use super::CompositeClient;

pub(crate) const FAMILY: &str = "RocketMQ";

pub type RocketMqClient = CompositeClient<RemotingProducer, RemotingConsumer, RemotingAdmin>;
