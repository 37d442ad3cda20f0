//! Service definitions: the static declaration of a messaging service.
//!
//! A definition names a service and declares its events, its messages (the
//! remotely callable operations, each with an async handler), and its
//! methods (local-only operations). The same definition drives a
//! [`RemoteServiceHost`](super::RemoteServiceHost), a
//! [`RemoteServiceClient`](super::RemoteServiceClient), and the collapsed
//! [`LocalService`](super::LocalService).

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::protocol::Fault;
use crate::commbus::CommBus;
use crate::service::{Member, Operation};
use crate::types::{Error, Result};

/// Async message handler. Receives the executing service and positional args.
pub type MessageHandler = Arc<
    dyn Fn(ServiceHandle, Vec<Value>) -> BoxFuture<'static, std::result::Result<Value, Fault>>
        + Send
        + Sync,
>;

/// The executing service as seen from inside a message handler.
#[derive(Clone)]
pub struct ServiceHandle {
    name: Arc<str>,
    events: Arc<CommBus<Value>>,
    methods: Arc<BTreeMap<String, Operation>>,
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emit an event on the service's local bus. A host re-broadcasts
    /// declared events to its connected peers.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.events.publish(event, &payload)
    }

    /// Call a local-only method.
    pub async fn call_method(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let op = self.methods.get(method).cloned().ok_or_else(|| {
            Error::not_found(format!("method '{method}' on service '{}'", self.name))
        })?;
        op(args).await
    }

    pub(crate) fn events(&self) -> &Arc<CommBus<Value>> {
        &self.events
    }
}

/// Declaration of a messaging service.
#[derive(Clone, Default)]
pub struct ServiceDefinition {
    name: String,
    events: BTreeSet<String>,
    messages: BTreeMap<String, Option<MessageHandler>>,
    methods: BTreeMap<String, Operation>,
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("events", &self.events)
            .field("messages", &self.messages.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare an event the service may emit.
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.events.insert(name.into());
        self
    }

    /// Declare a message together with its handler.
    pub fn message<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ServiceHandle, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, Fault>> + Send + 'static,
    {
        let handler: MessageHandler = Arc::new(move |handle, args| Box::pin(handler(handle, args)));
        self.messages.insert(name.into(), Some(handler));
        self
    }

    /// Declare a message by name only. Enough for a client; a host rejects it.
    pub fn declare_message(mut self, name: impl Into<String>) -> Self {
        self.messages.entry(name.into()).or_insert(None);
        self
    }

    /// Add a local-only method, never exposed over the protocol.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.methods.insert(name.into(), crate::service::operation(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(String::as_str)
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn has_message(&self, name: &str) -> bool {
        self.messages.contains_key(name)
    }
}

/// Handler table shared by the host and local execution modes.
pub(crate) struct Executor {
    handle: ServiceHandle,
    messages: BTreeMap<String, MessageHandler>,
    events: BTreeSet<String>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("service", &self.handle.name)
            .field("messages", &self.messages.keys().collect::<Vec<_>>())
            .field("events", &self.events)
            .finish()
    }
}

impl Executor {
    /// Every declared message must carry a handler.
    pub(crate) fn new(definition: ServiceDefinition) -> Result<Self> {
        let ServiceDefinition {
            name,
            events,
            messages,
            methods,
        } = definition;

        if name.is_empty() {
            return Err(Error::configuration("service definition needs a name"));
        }

        let messages = messages
            .into_iter()
            .map(|(message, handler)| match handler {
                Some(handler) => Ok((message, handler)),
                None => Err(Error::configuration(format!(
                    "message '{message}' of service '{name}' has no handler"
                ))),
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            handle: ServiceHandle {
                name: Arc::from(name),
                events: Arc::new(CommBus::new()),
                methods: Arc::new(methods),
            },
            messages,
            events,
        })
    }

    pub(crate) fn handle(&self) -> &ServiceHandle {
        &self.handle
    }

    pub(crate) fn events(&self) -> &BTreeSet<String> {
        &self.events
    }

    pub(crate) fn messages(&self) -> impl Iterator<Item = (&String, &MessageHandler)> {
        self.messages.iter()
    }

    /// Run a message handler in the calling task.
    pub(crate) fn call(
        &self,
        message: &str,
        args: Vec<Value>,
    ) -> BoxFuture<'static, std::result::Result<Value, Fault>> {
        match self.messages.get(message) {
            Some(handler) => handler(self.handle.clone(), args),
            None => {
                let fault = Fault::message(format!(
                    "unknown message '{message}' on service '{}'",
                    self.handle.name
                ));
                Box::pin(async move { Err(fault) })
            }
        }
    }

    pub(crate) fn member(&self, name: &str) -> Option<Member> {
        (self.messages.contains_key(name) || self.handle.methods.contains_key(name))
            .then_some(Member::Function)
    }

    /// Messages surface as operations with faults mapped to remote errors.
    pub(crate) fn operation(&self, name: &str) -> Option<Operation> {
        if let Some(handler) = self.messages.get(name) {
            let handler = Arc::clone(handler);
            let handle = self.handle.clone();
            let op: Operation = Arc::new(move |args| {
                let call = handler(handle.clone(), args);
                Box::pin(async move { call.await.map_err(|fault| Error::remote(fault.error_message())) })
            });
            return Some(op);
        }
        self.handle.methods.get(name).cloned()
    }
}
