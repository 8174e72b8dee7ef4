//! # MQ Toolkit Test Suite
//!
//! Cross-component tests for the messaging core.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── flows.rs        # service → orchestrator → event sink / history
//!     ├── cache.rs        # one live client per connection id
//!     ├── validation.rs   # inputs rejected before any network I/O
//!     └── unreachable.rs  # real adapters against closed ports
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mq-tests
//! cargo test -p mq-tests integration::flows::
//! ```
//!
//! No broker is needed: adapter tests only target endpoints that refuse
//! connections.

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
