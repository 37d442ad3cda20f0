//! Service values bound into the backbone.
//!
//! A service is any `Send + Sync` value implementing [`Service`]. The trait
//! exposes three capabilities, each optional:
//!   - a structural view (`member`) used by interface matching,
//!   - named callable operations (`operation`),
//!   - an event-registration scope (`event_scope`) used by scoped routing.
//!
//! Concrete types are recovered with [`downcast`].

use futures::future::BoxFuture;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::commbus::{CommBus, Handler};
use crate::types::{Error, Result};

/// Shared handle to a bound service.
pub type ServiceRef = Arc<dyn Service>;

/// A callable member: positional JSON arguments in, JSON result out.
pub type Operation = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Handler for a named application event.
pub type EventHandler = Handler<Value>;

/// Wrap an async closure as an [`Operation`].
pub fn operation<F, Fut>(f: F) -> Operation
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// Structural view of one service member.
#[derive(Debug, Clone)]
pub enum Member {
    /// A callable operation.
    Function,
    /// Plain data.
    Value(Value),
    /// A nested service.
    Service(ServiceRef),
}

/// Upcast to `Any` for downcasting shared services.
pub trait AsAnyArc {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A value that can be bound into the backbone.
pub trait Service: AsAnyArc + Send + Sync + fmt::Debug + 'static {
    /// Look up a member by name for structural matching.
    fn member(&self, name: &str) -> Option<Member>;

    /// Look up a callable member by name.
    fn operation(&self, _name: &str) -> Option<Operation> {
        None
    }

    /// Event-registration capability, if this service emits events.
    fn event_scope(&self) -> Option<&dyn EventScope> {
        None
    }
}

impl dyn Service {
    /// Invoke the operation `name` with positional `args`.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        match self.operation(name) {
            Some(op) => op(args),
            None => {
                let err = Error::not_found(format!("operation '{name}' on {self:?}"));
                Box::pin(async move { Err(err) })
            }
        }
    }
}

/// Recover the concrete type behind a shared service.
pub fn downcast<T: Service>(service: &ServiceRef) -> Option<Arc<T>> {
    service.clone().into_any().downcast::<T>().ok()
}

/// Something that accepts event subscriptions by (possibly scoped) name.
pub trait EventScope: Send + Sync {
    /// Subscribe to every future emission of `event`.
    fn on(&self, event: &str, handler: EventHandler) -> Result<()>;

    /// Subscribe to the next emission of `event` only.
    fn once(&self, event: &str, handler: EventHandler) -> Result<()>;
}

impl EventScope for CommBus<Value> {
    fn on(&self, event: &str, handler: EventHandler) -> Result<()> {
        self.subscribe(event, handler);
        Ok(())
    }

    fn once(&self, event: &str, handler: EventHandler) -> Result<()> {
        CommBus::once(self, event, handler);
        Ok(())
    }
}

// =============================================================================
// ServiceObject
// =============================================================================

#[derive(Clone)]
enum Slot {
    Value(Value),
    Operation(Operation),
    Service(ServiceRef),
}

/// A dynamic service assembled from named values, operations, and sub-services.
#[derive(Default)]
pub struct ServiceObject {
    members: BTreeMap<String, Slot>,
    events: Option<CommBus<Value>>,
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<&str> = self.members.keys().map(String::as_str).collect();
        f.debug_struct("ServiceObject")
            .field("members", &members)
            .field("events", &self.events.is_some())
            .finish()
    }
}

impl ServiceObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.members.insert(name.into(), Slot::Value(value));
        self
    }

    pub fn with_operation(mut self, name: impl Into<String>, op: Operation) -> Self {
        self.members.insert(name.into(), Slot::Operation(op));
        self
    }

    pub fn with_service(mut self, name: impl Into<String>, service: ServiceRef) -> Self {
        self.members.insert(name.into(), Slot::Service(service));
        self
    }

    /// Give this service its own event bus.
    pub fn with_events(mut self) -> Self {
        self.events = Some(CommBus::new());
        self
    }

    /// Read a plain-data member.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.members.get(name) {
            Some(Slot::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Emit an event on this service's bus. No-op without `with_events`.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        self.events
            .as_ref()
            .map_or(0, |bus| bus.publish(event, payload))
    }

    pub fn into_ref(self) -> ServiceRef {
        Arc::new(self)
    }
}

impl Service for ServiceObject {
    fn member(&self, name: &str) -> Option<Member> {
        self.members.get(name).map(|slot| match slot {
            Slot::Value(v) => Member::Value(v.clone()),
            Slot::Operation(_) => Member::Function,
            Slot::Service(s) => Member::Service(s.clone()),
        })
    }

    fn operation(&self, name: &str) -> Option<Operation> {
        match self.members.get(name) {
            Some(Slot::Operation(op)) => Some(op.clone()),
            _ => None,
        }
    }

    fn event_scope(&self) -> Option<&dyn EventScope> {
        self.events.as_ref().map(|bus| bus as &dyn EventScope)
    }
}
