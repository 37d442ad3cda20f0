//! In-process channel implementation.
//!
//! A [`MemoryNetwork`] is a registry of endpoint inboxes keyed by address
//! (appspace + id). Each [`MemoryChannel`] owns one inbox and, once started,
//! a delivery task that drains it in order. Payloads cross the network
//! JSON-encoded, the same as over a process boundary.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::channel::{
    Channel, ChannelHandler, ChannelIdentity, ConnectionEvent, ConnectionHandler, Target,
};
use crate::types::{Error, PeerId, Result};

#[derive(Debug)]
enum Frame {
    Message {
        topic: String,
        payload: Vec<u8>, // JSON-encoded
        from: PeerId,
    },
    Connection(ConnectionEvent),
}

/// Shared address space for in-process channels.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<String, mpsc::UnboundedSender<Frame>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a server-role endpoint that peers can connect to.
    pub fn serve(&self, identity: ChannelIdentity) -> Result<Arc<MemoryChannel>> {
        let inbox = self.register(&identity)?;
        tracing::debug!(address = %identity, "memory channel serving");
        Ok(Arc::new(MemoryChannel::new(identity, self.clone(), inbox)))
    }

    /// Open a client-role endpoint connected to `server` in the same appspace.
    pub fn connect(&self, identity: ChannelIdentity, server: &PeerId) -> Result<Arc<MemoryChannel>> {
        let server_address = address(&identity.appspace, server);
        if !self.endpoints.contains_key(&server_address) {
            return Err(Error::channel(format!(
                "no endpoint at '{server_address}'"
            )));
        }

        let inbox = self.register(&identity)?;
        let channel = MemoryChannel::new(identity, self.clone(), inbox);
        let own_address = channel.identity.address();

        // Both sides learn about the link through their own delivery task.
        self.deliver(
            &server_address,
            Frame::Connection(ConnectionEvent::Connected(channel.identity.id.clone())),
        )?;
        self.deliver(
            &own_address,
            Frame::Connection(ConnectionEvent::Connected(server.clone())),
        )?;

        tracing::debug!(address = %own_address, server = %server_address, "memory channel connected");
        Ok(Arc::new(channel))
    }

    /// Whether an endpoint is currently registered at `identity`'s address.
    pub fn is_registered(&self, identity: &ChannelIdentity) -> bool {
        self.endpoints.contains_key(&identity.address())
    }

    fn register(&self, identity: &ChannelIdentity) -> Result<mpsc::UnboundedReceiver<Frame>> {
        match self.endpoints.entry(identity.address()) {
            Entry::Occupied(_) => Err(Error::channel(format!(
                "address '{identity}' is already in use"
            ))),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    fn deliver(&self, address: &str, frame: Frame) -> Result<()> {
        let sender = self
            .endpoints
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::channel(format!("no endpoint at '{address}'")))?;
        sender
            .send(frame)
            .map_err(|_| Error::channel(format!("endpoint '{address}' is closed")))
    }

    fn unregister(&self, address: &str) {
        self.endpoints.remove(address);
    }
}

fn address(appspace: &str, id: &PeerId) -> String {
    format!("{appspace}{id}")
}

/// Handler tables and peer set, shared with the delivery task.
#[derive(Default)]
struct Routes {
    peers: RwLock<BTreeSet<PeerId>>,
    topics: RwLock<HashMap<String, Vec<ChannelHandler>>>,
    connection: RwLock<Vec<ConnectionHandler>>,
}

impl Routes {
    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Message {
                topic,
                payload,
                from,
            } => {
                let handlers = self.topics.read().get(&topic).cloned();
                let Some(handlers) = handlers else {
                    tracing::trace!(topic = %topic, "no handler for inbound payload");
                    return;
                };
                let value: Value = match serde_json::from_slice(&payload) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!(topic = %topic, error = %err, "dropping undecodable payload");
                        return;
                    }
                };
                for handler in &handlers {
                    handler(value.clone(), from.clone());
                }
            }
            Frame::Connection(event) => {
                match &event {
                    ConnectionEvent::Connected(peer) => {
                        self.peers.write().insert(peer.clone());
                    }
                    ConnectionEvent::Disconnected(peer) => {
                        self.peers.write().remove(peer);
                    }
                }
                self.notify(&event);
            }
        }
    }

    fn notify(&self, event: &ConnectionEvent) {
        let handlers = self.connection.read().clone();
        for handler in &handlers {
            handler(event.clone());
        }
    }
}

/// One endpoint on a [`MemoryNetwork`].
pub struct MemoryChannel {
    identity: ChannelIdentity,
    network: MemoryNetwork,
    routes: Arc<Routes>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("identity", &self.identity)
            .field("peers", &*self.routes.peers.read())
            .field("started", &self.inbox.lock().is_none())
            .finish()
    }
}

impl MemoryChannel {
    fn new(
        identity: ChannelIdentity,
        network: MemoryNetwork,
        inbox: mpsc::UnboundedReceiver<Frame>,
    ) -> Self {
        Self {
            identity,
            network,
            routes: Arc::new(Routes::default()),
            inbox: Mutex::new(Some(inbox)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Currently connected peers.
    pub fn peers(&self) -> Vec<PeerId> {
        self.routes.peers.read().iter().cloned().collect()
    }

    /// Leave the network. Every connected peer, and this channel's own
    /// connection handlers, observe a disconnect.
    pub fn disconnect(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let peers = std::mem::take(&mut *self.routes.peers.write());
        for peer in &peers {
            let frame = Frame::Connection(ConnectionEvent::Disconnected(self.identity.id.clone()));
            if let Err(err) = self
                .network
                .deliver(&address(&self.identity.appspace, peer), frame)
            {
                tracing::debug!(peer = %peer, error = %err, "peer already gone");
            }
        }

        self.network.unregister(&self.identity.address());
        self.shutdown.cancel();

        for peer in peers {
            self.routes.notify(&ConnectionEvent::Disconnected(peer));
        }
        tracing::debug!(address = %self.identity, "memory channel disconnected");
    }

    fn send(&self, peer: &PeerId, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.network.deliver(
            &address(&self.identity.appspace, peer),
            Frame::Message {
                topic: topic.to_string(),
                payload,
                from: self.identity.id.clone(),
            },
        )
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn identity(&self) -> &ChannelIdentity {
        &self.identity
    }

    fn emit(&self, target: Target, topic: &str, payload: Value) -> Result<()> {
        let payload = serde_json::to_vec(&payload)?;
        match target {
            Target::Peer(peer) => self.send(&peer, topic, payload),
            Target::Broadcast => {
                for peer in self.peers() {
                    if let Err(err) = self.send(&peer, topic, payload.clone()) {
                        tracing::warn!(peer = %peer, topic = %topic, error = %err, "broadcast delivery failed");
                    }
                }
                Ok(())
            }
        }
    }

    fn on(&self, topic: &str, handler: ChannelHandler) {
        self.routes
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    fn on_connection(&self, handler: ConnectionHandler) {
        self.routes.connection.write().push(handler);
    }

    async fn start(&self) -> Result<()> {
        let Some(mut inbox) = self.inbox.lock().take() else {
            return Err(Error::channel(format!(
                "channel '{}' is already started",
                self.identity
            )));
        };

        let routes = Arc::clone(&self.routes);
        let shutdown = self.shutdown.clone();
        let address = self.identity.address();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    frame = inbox.recv() => match frame {
                        Some(frame) => routes.dispatch(frame),
                        None => break,
                    },
                }
            }
            tracing::trace!(address = %address, "delivery task stopped");
        });

        tracing::debug!(address = %self.identity, "memory channel started");
        Ok(())
    }
}
