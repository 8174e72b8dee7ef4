//! # Shared Types Crate
//!
//! The broker-neutral data model, the error model and the validation helpers
//! used by every crate in the workspace.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: connection, request, message and history
//!   types are defined here and nowhere else.
//! - **Typed Failures**: every cross-crate failure is an [`MqError`] with a
//!   kind and a stable code.

pub mod entities;
pub mod errors;
pub mod utils;

pub use entities::*;
pub use errors::*;
pub use utils::{generate_id, is_valid_topic, mask_password};
