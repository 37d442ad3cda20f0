//! Channel abstraction: the transport the message protocol runs over.
//!
//! A channel is a named, addressable, bidirectional endpoint. It can emit a
//! named payload to one peer or broadcast it to every connected peer, and it
//! delivers inbound payloads to per-topic handlers along with the sender.
//! Framing, reconnection, and process spawning belong to the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::types::{PeerId, Result, DEFAULT_APPSPACE};

/// Inbound payload handler: `(payload, sender)`.
pub type ChannelHandler = Arc<dyn Fn(Value, PeerId) + Send + Sync>;

/// Connection state change handler.
pub type ConnectionHandler = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Destination of an emitted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Peer(PeerId),
    Broadcast,
}

/// A peer connected to or disconnected from this channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(PeerId),
    Disconnected(PeerId),
}

/// Process-unique identity plus the appspace it is grouped under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub id: PeerId,
    pub appspace: String,
}

impl ChannelIdentity {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            appspace: DEFAULT_APPSPACE.to_string(),
        }
    }

    pub fn with_appspace(mut self, appspace: impl Into<String>) -> Self {
        self.appspace = appspace.into();
        self
    }

    /// Fully-qualified address: appspace followed by id.
    pub fn address(&self) -> String {
        format!("{}{}", self.appspace, self.id)
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Transport consumed by hosts and clients.
///
/// Handlers must be registered before [`Channel::start`]; payloads that
/// arrive earlier are buffered, not dropped.
#[async_trait]
pub trait Channel: Send + Sync + fmt::Debug {
    fn identity(&self) -> &ChannelIdentity;

    /// Send `payload` on `topic` to one peer or to every connected peer.
    fn emit(&self, target: Target, topic: &str, payload: Value) -> Result<()>;

    /// Register a handler for inbound payloads on `topic`.
    fn on(&self, topic: &str, handler: ChannelHandler);

    /// Register a handler for connect/disconnect notifications.
    fn on_connection(&self, handler: ConnectionHandler);

    /// Begin delivering inbound payloads. Resolves once the channel is ready.
    async fn start(&self) -> Result<()>;
}
