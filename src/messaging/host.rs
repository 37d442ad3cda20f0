//! Host side of the message protocol.
//!
//! A host exposes one [`ServiceDefinition`] over a [`Channel`]:
//!   - each `message.<name>` request runs its handler in a fresh task and is
//!     answered on `message.<name>` or `error.<name>` to the sender only,
//!   - each declared event emitted locally is re-broadcast as `event.<name>`
//!     to every connected peer.
//!
//! A failing or panicking handler produces an error response; it never
//! takes the host down.

use serde_json::Value;
use std::sync::{Arc, Weak};

use super::channel::{Channel, ChannelIdentity, Target};
use super::definition::{Executor, MessageHandler, ServiceDefinition, ServiceHandle};
use super::protocol::{normalize_args, topic, CallRequest, CallResponse, ErrorResponse, EventEnvelope, Fault};
use crate::commbus::Subscription;
use crate::service::{EventScope, Member, Operation, Service, ServiceRef};
use crate::types::{PeerId, Result};

#[derive(Debug)]
struct HostInner {
    executor: Executor,
    channel: Arc<dyn Channel>,
}

/// Serves a service definition to remote clients.
#[derive(Debug, Clone)]
pub struct RemoteServiceHost {
    inner: Arc<HostInner>,
}

impl RemoteServiceHost {
    /// Register handlers on `channel`, start it, and resolve once it is ready.
    pub async fn start(definition: ServiceDefinition, channel: Arc<dyn Channel>) -> Result<Self> {
        let executor = Executor::new(definition)?;
        let inner = Arc::new(HostInner { executor, channel });

        for (message, handler) in inner.executor.messages() {
            let weak = Arc::downgrade(&inner);
            let message = message.clone();
            let handler = Arc::clone(handler);
            inner.channel.on(
                &topic::message(&message),
                Arc::new(move |payload: Value, sender: PeerId| {
                    accept(&weak, &message, &handler, payload, sender);
                }),
            );
        }

        for event in inner.executor.events() {
            let channel = Arc::clone(&inner.channel);
            let source = channel.identity().id.clone();
            let wire_topic = topic::event(event);
            inner.executor.handle().events().subscribe(
                event,
                Arc::new(move |payload: &Value| {
                    let envelope = EventEnvelope {
                        id: source.clone(),
                        message: payload.clone(),
                    };
                    let sent = serde_json::to_value(envelope)
                        .map_err(Into::into)
                        .and_then(|body| channel.emit(Target::Broadcast, &wire_topic, body));
                    if let Err(err) = sent {
                        tracing::warn!(topic = %wire_topic, error = %err, "event broadcast failed");
                    }
                }),
            );
        }

        inner.channel.start().await?;

        tracing::info!(
            service = %inner.executor.handle().name(),
            address = %inner.channel.identity(),
            "remote service host started"
        );
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        self.inner.executor.handle().name()
    }

    pub fn identity(&self) -> &ChannelIdentity {
        self.inner.channel.identity()
    }

    /// Handle passed to message handlers; usable for emitting from outside one.
    pub fn handle(&self) -> &ServiceHandle {
        self.inner.executor.handle()
    }

    /// Emit an event locally. Declared events are also broadcast to peers.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.handle().emit(event, payload)
    }

    /// Same-process call, bypassing the channel.
    pub async fn call(&self, message: &str, args: Vec<Value>) -> std::result::Result<Value, Fault> {
        self.inner.executor.call(message, args).await
    }

    pub async fn call_method(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.handle().call_method(method, args).await
    }

    /// Listen to the host's own events.
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handle().events().subscribe(event, Arc::new(handler))
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        self.handle().events().unsubscribe(subscription)
    }

    pub fn into_ref(self) -> ServiceRef {
        Arc::new(self)
    }
}

/// Decode one inbound request and hand it to a fresh task.
fn accept(
    host: &Weak<HostInner>,
    message: &str,
    handler: &MessageHandler,
    payload: Value,
    sender: PeerId,
) {
    let Some(host) = host.upgrade() else {
        return;
    };
    let request: CallRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(message = %message, peer = %sender, error = %err, "malformed request");
            return;
        }
    };
    tokio::spawn(respond(
        host,
        message.to_string(),
        Arc::clone(handler),
        request,
        sender,
    ));
}

async fn respond(
    host: Arc<HostInner>,
    message: String,
    handler: MessageHandler,
    request: CallRequest,
    sender: PeerId,
) {
    let CallRequest { id, args } = request;
    let handle = host.executor.handle().clone();

    // Own task so a panicking handler surfaces as a JoinError, including
    // panics raised before the handler returns its future.
    let call = tokio::spawn(async move { handler(handle, normalize_args(args)).await });
    let outcome = match call.await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!(message = %message, call_id = %id, error = %join_err, "message handler panicked");
            Err(Fault::message(format!("handler for '{message}' panicked")))
        }
    };

    let reply = match outcome {
        Ok(result) => serde_json::to_value(CallResponse {
            id: id.clone(),
            message: result,
        })
        .map(|body| (topic::message(&message), body)),
        Err(fault) => {
            tracing::debug!(message = %message, call_id = %id, error = %fault, "message handler failed");
            serde_json::to_value(ErrorResponse {
                id: id.clone(),
                message: fault.error_message(),
            })
            .map(|body| (topic::error(&message), body))
        }
    };

    let sent = reply
        .map_err(Into::into)
        .and_then(|(wire_topic, body)| host.channel.emit(Target::Peer(sender.clone()), &wire_topic, body));
    if let Err(err) = sent {
        tracing::warn!(message = %message, call_id = %id, peer = %sender, error = %err, "response not delivered");
    }
}

impl Service for RemoteServiceHost {
    fn member(&self, name: &str) -> Option<Member> {
        self.inner.executor.member(name)
    }

    fn operation(&self, name: &str) -> Option<Operation> {
        self.inner.executor.operation(name)
    }

    fn event_scope(&self) -> Option<&dyn EventScope> {
        Some(&**self.handle().events())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::memory::MemoryNetwork;
    use crate::types::CallId;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn peer(id: &str) -> PeerId {
        PeerId::from_string(id.to_string()).unwrap()
    }

    fn definition() -> ServiceDefinition {
        ServiceDefinition::new("db")
            .event("changed")
            .message("echo", |_handle, args| async move { Ok(Value::Array(args)) })
            .message("fail", |_handle, _args| async {
                Err(Fault::from_value(json!({"description": "disk full"})))
            })
            .message("explode", |_handle, _args| async {
                if true {
                    panic!("handler bug");
                }
                Ok(Value::Null)
            })
            .message("first", |_handle, args| {
                // Indexes before the future exists.
                let first = args[0].clone();
                async move { Ok(first) }
            })
            .message("touch", |handle, args| async move {
                handle.emit("changed", args.into_iter().next().unwrap_or_default());
                Ok(json!(true))
            })
    }

    /// Raw protocol peer: a connected channel recording every topic it sees.
    async fn raw_peer(
        network: &MemoryNetwork,
        topics: &[&str],
    ) -> (Arc<crate::messaging::MemoryChannel>, mpsc::UnboundedReceiver<(String, Value)>) {
        let channel = network
            .connect(ChannelIdentity::new(peer("raw")), &peer("db"))
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        for t in topics {
            let tx = tx.clone();
            let name = t.to_string();
            channel.on(
                t,
                Arc::new(move |payload: Value, _from: PeerId| {
                    let _ = tx.send((name.clone(), payload));
                }),
            );
        }
        channel.start().await.unwrap();
        (channel, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("closed")
    }

    async fn host(network: &MemoryNetwork) -> RemoteServiceHost {
        let channel = network.serve(ChannelIdentity::new(peer("db"))).unwrap();
        RemoteServiceHost::start(definition(), channel).await.unwrap()
    }

    #[tokio::test]
    async fn test_request_answered_on_message_topic() {
        let network = MemoryNetwork::new();
        let _host = host(&network).await;
        let (raw, mut rx) = raw_peer(&network, &["message.echo", "error.echo"]).await;

        raw.emit(
            Target::Peer(peer("db")),
            "message.echo",
            json!({"id": "echo.0", "args": [1, 2]}),
        )
        .unwrap();

        let (topic, body) = next(&mut rx).await;
        assert_eq!(topic, "message.echo");
        assert_eq!(body, json!({"id": "echo.0", "message": [1, 2]}));
    }

    #[tokio::test]
    async fn test_scalar_args_normalized() {
        let network = MemoryNetwork::new();
        let _host = host(&network).await;
        let (raw, mut rx) = raw_peer(&network, &["message.echo"]).await;

        raw.emit(Target::Peer(peer("db")), "message.echo", json!({"id": "echo.1", "args": "x"}))
            .unwrap();
        raw.emit(Target::Peer(peer("db")), "message.echo", json!({"id": "echo.2"}))
            .unwrap();

        let mut replies = vec![next(&mut rx).await.1, next(&mut rx).await.1];
        replies.sort_by_key(|body| body["id"].as_str().unwrap_or_default().to_string());
        assert_eq!(replies[0], json!({"id": "echo.1", "message": ["x"]}));
        assert_eq!(replies[1], json!({"id": "echo.2", "message": []}));
    }

    #[tokio::test]
    async fn test_failure_answered_on_error_topic() {
        let network = MemoryNetwork::new();
        let _host = host(&network).await;
        let (raw, mut rx) = raw_peer(&network, &["message.fail", "error.fail"]).await;

        raw.emit(Target::Peer(peer("db")), "message.fail", json!({"id": "fail.0", "args": []}))
            .unwrap();

        let (topic, body) = next(&mut rx).await;
        assert_eq!(topic, "error.fail");
        assert_eq!(body, json!({"id": "fail.0", "message": "disk full"}));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let network = MemoryNetwork::new();
        let _host = host(&network).await;
        let (raw, mut rx) =
            raw_peer(&network, &["error.explode", "message.echo"]).await;

        raw.emit(Target::Peer(peer("db")), "message.explode", json!({"id": "explode.0"}))
            .unwrap();
        let (topic, body) = next(&mut rx).await;
        assert_eq!(topic, "error.explode");
        assert!(body["message"].as_str().unwrap().contains("panicked"));

        // Still serving.
        raw.emit(Target::Peer(peer("db")), "message.echo", json!({"id": "echo.9", "args": [9]}))
            .unwrap();
        assert_eq!(next(&mut rx).await.0, "message.echo");
    }

    #[tokio::test]
    async fn test_panic_before_future_is_answered() {
        let network = MemoryNetwork::new();
        let _host = host(&network).await;
        let (raw, mut rx) = raw_peer(&network, &["error.first", "message.first"]).await;

        raw.emit(Target::Peer(peer("db")), "message.first", json!({"id": "first.0", "args": []}))
            .unwrap();
        let (topic, body) = next(&mut rx).await;
        assert_eq!(topic, "error.first");
        assert_eq!(body["id"], json!("first.0"));
        assert!(body["message"].as_str().unwrap().contains("panicked"));

        raw.emit(Target::Peer(peer("db")), "message.first", json!({"id": "first.1", "args": [7]}))
            .unwrap();
        assert_eq!(
            next(&mut rx).await,
            ("message.first".to_string(), json!({"id": "first.1", "message": 7}))
        );
    }

    #[tokio::test]
    async fn test_declared_events_broadcast_with_host_id() {
        let network = MemoryNetwork::new();
        let host = host(&network).await;
        let (raw, mut rx) = raw_peer(&network, &["event.changed", "message.touch"]).await;

        raw.emit(Target::Peer(peer("db")), "message.touch", json!({"id": "touch.0", "args": [5]}))
            .unwrap();

        let mut seen = vec![next(&mut rx).await, next(&mut rx).await];
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(seen[0], ("event.changed".to_string(), json!({"id": "db", "message": 5})));
        assert_eq!(seen[1].0, "message.touch");

        // Direct emission from the host side reaches peers too.
        host.emit("changed", json!("direct"));
        assert_eq!(
            next(&mut rx).await,
            ("event.changed".to_string(), json!({"id": "db", "message": "direct"}))
        );
    }

    #[tokio::test]
    async fn test_malformed_request_ignored() {
        let network = MemoryNetwork::new();
        let _host = host(&network).await;
        let (raw, mut rx) = raw_peer(&network, &["message.echo", "error.echo"]).await;

        raw.emit(Target::Peer(peer("db")), "message.echo", json!("not a request"))
            .unwrap();
        raw.emit(Target::Peer(peer("db")), "message.echo", json!({"id": "echo.3", "args": []}))
            .unwrap();

        let (_, body) = next(&mut rx).await;
        assert_eq!(body["id"], json!(CallId::for_message("echo", 3).as_str()));
    }

    #[tokio::test]
    async fn test_same_process_call_and_service_surface() {
        let network = MemoryNetwork::new();
        let host = host(&network).await;

        assert_eq!(host.call("echo", vec![json!(1)]).await.unwrap(), json!([1]));
        assert_eq!(
            host.call("fail", vec![]).await.unwrap_err().error_message(),
            "disk full"
        );

        let service = host.clone().into_ref();
        assert!(matches!(service.member("echo"), Some(Member::Function)));
        assert!(service.member("changed").is_none());
        let err = service.invoke("fail", vec![]).await.unwrap_err();
        assert_eq!(err.code(), "REMOTE");
    }

    #[tokio::test]
    async fn test_start_rejects_declared_only_message() {
        let network = MemoryNetwork::new();
        let channel = network.serve(ChannelIdentity::new(peer("db"))).unwrap();
        let def = ServiceDefinition::new("db").declare_message("getMessage");
        assert!(RemoteServiceHost::start(def, channel).await.is_err());
    }
}
