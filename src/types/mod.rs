//! Core types shared by the backbone and the messaging protocol.
//!
//! - **IDs**: Strongly-typed identifiers (PeerId, CallId, SubscriptionId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for startup, messaging, and logging

mod config;
mod errors;
mod ids;

pub use config::{
    BackboneConfig, Config, MessagingConfig, ObservabilityConfig, DEFAULT_APPSPACE,
    DEFAULT_CALL_TIMEOUT,
};
pub use errors::{Error, Result};
pub use ids::{CallId, PeerId, SubscriptionId};
