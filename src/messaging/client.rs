//! Client side of the message protocol.
//!
//! Each call gets a correlation id (`<message>.<counter>`) and an entry in
//! the pending table. The entry is settled exactly once: by the matching
//! response, by the matching error, or by its timeout, whichever comes
//! first. Whoever settles it removes it, so a late response finds nothing
//! and is discarded.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::channel::{Channel, ConnectionEvent, Target};
use super::definition::ServiceDefinition;
use super::protocol::{topic, CallRequest, CallResponse, ErrorResponse, EventEnvelope};
use crate::commbus::{CommBus, Subscription};
use crate::service::{EventHandler, EventScope, Member, Operation, Service, ServiceRef};
use crate::types::{CallId, Error, MessagingConfig, PeerId, Result};

#[derive(Debug)]
struct PendingCall {
    reply: oneshot::Sender<Result<Value>>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct ClientInner {
    name: String,
    channel: Arc<dyn Channel>,
    host: PeerId,
    messages: BTreeSet<String>,
    events: CommBus<Value>,
    pending: DashMap<CallId, PendingCall>,
    counter: AtomicU64,
    connected: AtomicBool,
    call_timeout: Duration,
}

impl ClientInner {
    /// Settle a pending call. Returns false when it was already settled.
    fn settle(&self, id: &CallId, outcome: Result<Value>) -> bool {
        let Some((_, call)) = self.pending.remove(id) else {
            return false;
        };
        if let Some(timer) = call.timer {
            timer.abort();
        }
        // Receiver gone means the caller stopped waiting; nothing to do.
        let _ = call.reply.send(outcome);
        true
    }
}

/// Proxy for a service hosted behind a channel.
#[derive(Debug, Clone)]
pub struct RemoteServiceClient {
    inner: Arc<ClientInner>,
}

impl RemoteServiceClient {
    /// Register response and event listeners, start `channel`, and resolve
    /// once it is ready. `host` is the peer serving the definition.
    pub async fn start(
        definition: &ServiceDefinition,
        channel: Arc<dyn Channel>,
        host: PeerId,
        config: &MessagingConfig,
    ) -> Result<Self> {
        let inner = Arc::new(ClientInner {
            name: definition.name().to_string(),
            channel,
            host,
            messages: definition.messages().map(str::to_string).collect(),
            events: CommBus::new(),
            pending: DashMap::new(),
            counter: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            call_timeout: config.call_timeout,
        });

        for message in &inner.messages {
            let weak = Arc::downgrade(&inner);
            inner.channel.on(
                &topic::message(message),
                Arc::new(move |payload: Value, _from: PeerId| {
                    let Some(inner) = weak.upgrade() else { return };
                    match serde_json::from_value::<CallResponse>(payload) {
                        Ok(response) => {
                            if !inner.settle(&response.id, Ok(response.message)) {
                                tracing::debug!(call_id = %response.id, "discarding late response");
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, "malformed response"),
                    }
                }),
            );

            let weak = Arc::downgrade(&inner);
            inner.channel.on(
                &topic::error(message),
                Arc::new(move |payload: Value, _from: PeerId| {
                    let Some(inner) = weak.upgrade() else { return };
                    match serde_json::from_value::<ErrorResponse>(payload) {
                        Ok(response) => {
                            if !inner.settle(&response.id, Err(Error::remote(response.message))) {
                                tracing::debug!(call_id = %response.id, "discarding late error");
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, "malformed error response"),
                    }
                }),
            );
        }

        for event in definition.events() {
            let weak = Arc::downgrade(&inner);
            let name = event.to_string();
            inner.channel.on(
                &topic::event(event),
                Arc::new(move |payload: Value, _from: PeerId| {
                    let Some(inner) = weak.upgrade() else { return };
                    match serde_json::from_value::<EventEnvelope>(payload) {
                        Ok(envelope) => {
                            inner.events.publish(&name, &envelope.message);
                        }
                        Err(err) => tracing::warn!(event = %name, error = %err, "malformed event"),
                    }
                }),
            );
        }

        let weak = Arc::downgrade(&inner);
        inner
            .channel
            .on_connection(Arc::new(move |event: ConnectionEvent| {
                let Some(inner) = weak.upgrade() else { return };
                match event {
                    ConnectionEvent::Connected(peer) if peer == inner.host => {
                        inner.connected.store(true, Ordering::SeqCst);
                        tracing::debug!(service = %inner.name, host = %peer, "client connected");
                    }
                    ConnectionEvent::Disconnected(peer) if peer == inner.host => {
                        inner.connected.store(false, Ordering::SeqCst);
                        tracing::info!(service = %inner.name, host = %peer, "client disconnected");
                    }
                    _ => {}
                }
            }));

        inner.channel.start().await?;

        tracing::info!(
            service = %inner.name,
            address = %inner.channel.identity(),
            host = %inner.host,
            "remote service client started"
        );
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the channel currently reports a live link to the host.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Calls sent and not yet settled.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Send `message` with `args` to the host.
    ///
    /// Fails immediately for an undeclared message or an emit failure;
    /// otherwise returns a reply that settles with the result, the host's
    /// error text, or a timeout.
    pub fn call(&self, message: &str, args: Vec<Value>) -> Result<PendingReply> {
        if !self.inner.messages.contains(message) {
            return Err(Error::not_found(format!(
                "message '{message}' on service '{}'",
                self.inner.name
            )));
        }

        let counter = self.inner.counter.fetch_add(1, Ordering::SeqCst);
        let id = CallId::for_message(message, counter);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(
            id.clone(),
            PendingCall {
                reply: tx,
                timer: None,
            },
        );

        let request = CallRequest {
            id: id.clone(),
            args: Value::Array(args),
        };
        let sent = serde_json::to_value(request).map_err(Into::into).and_then(|body| {
            self.inner
                .channel
                .emit(Target::Peer(self.inner.host.clone()), &topic::message(message), body)
        });
        if let Err(err) = sent {
            self.inner.pending.remove(&id);
            return Err(err);
        }

        let timer = tokio::spawn(expire(
            Arc::downgrade(&self.inner),
            id.clone(),
            self.inner.call_timeout,
        ));
        match self.inner.pending.get_mut(&id) {
            Some(mut call) => call.timer = Some(timer),
            // Already answered.
            None => timer.abort(),
        }

        tracing::trace!(call_id = %id, "call sent");
        Ok(PendingReply { id, rx })
    }

    /// Send a call and wait for it to settle.
    pub async fn request(&self, message: &str, args: Vec<Value>) -> Result<Value> {
        self.call(message, args)?.await
    }

    /// Listen to a remote event, re-emitted locally with its payload only.
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(event, Arc::new(handler))
    }

    pub fn once<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.once(event, Arc::new(handler))
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        self.inner.events.unsubscribe(subscription)
    }

    pub fn into_ref(self) -> ServiceRef {
        Arc::new(self)
    }
}

async fn expire(inner: Weak<ClientInner>, id: CallId, after: Duration) {
    tokio::time::sleep(after).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if inner.settle(&id, Err(Error::timeout(format!("call {id} got no response within {after:?}")))) {
        tracing::warn!(call_id = %id, timeout = ?after, "call timed out");
    }
}

/// Future settling with the outcome of one call.
#[derive(Debug)]
pub struct PendingReply {
    id: CallId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingReply {
    pub fn id(&self) -> &CallId {
        &self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::internal(format!(
                "call {} dropped before settling",
                self.id
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Service for RemoteServiceClient {
    fn member(&self, name: &str) -> Option<Member> {
        self.inner.messages.contains(name).then_some(Member::Function)
    }

    fn operation(&self, name: &str) -> Option<Operation> {
        if !self.inner.messages.contains(name) {
            return None;
        }
        let client = self.clone();
        let message = name.to_string();
        let op: Operation = Arc::new(move |args| {
            let reply = client.call(&message, args);
            Box::pin(async move { reply?.await })
        });
        Some(op)
    }

    fn event_scope(&self) -> Option<&dyn EventScope> {
        Some(self)
    }
}

impl EventScope for RemoteServiceClient {
    fn on(&self, event: &str, handler: EventHandler) -> Result<()> {
        self.inner.events.subscribe(event, handler);
        Ok(())
    }

    fn once(&self, event: &str, handler: EventHandler) -> Result<()> {
        self.inner.events.once(event, handler);
        Ok(())
    }
}
