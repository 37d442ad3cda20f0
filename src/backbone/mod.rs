//! Service backbone: layered, dependency-ordered service instantiation.
//!
//! The backbone owns:
//!   - a name → service registry (append-only; a bound name is permanent)
//!   - a bind-notification bus ("service X has just been bound")
//!   - an application event bus with scoped routing (`"scope:event"`)
//!
//! Dependencies are resolved three ways:
//!   - **Backward**: a factory's declared dependency names, looked up among
//!     services bound in strictly earlier layers
//!   - **Forward**: [`Backbone::on_service_bind`], called back once the named
//!     service is bound (or immediately if it already is)
//!   - **Conforming**: [`Backbone::on_conforming_service_bind`], called back for
//!     every bound service matching an interface
//!
//! ## Startup
//! ```text
//!   layer 0 ──resolve all concurrently──▶ barrier ──bind all──┐
//!                                                             ▼
//!   layer 1 ──resolve all concurrently──▶ barrier ──bind all──┐
//!                                                             ▼
//!   ...                                                    Backbone
//! ```
//! A failing factory aborts startup; services bound by earlier layers stay bound.

mod layers;
mod scope;

pub use layers::{
    validate_layers, BuildFn, Factory, FactoryContext, ServiceDescriptor, ServiceLayer,
};
pub use scope::ScopedName;

use futures::future::{try_join_all, BoxFuture};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::commbus::{CommBus, Handler, Subscription};
use crate::interface::{Interface, InterfaceDescriptor};
use crate::service::{downcast, EventHandler, EventScope, Member, Service, ServiceRef};
use crate::types::{Error, Result};

/// Topic carrying every bind notification.
pub const SERVICE_BIND: &str = "service-bind";

fn bind_topic(name: &str) -> String {
    format!("{SERVICE_BIND}:{name}")
}

/// Payload of a bind notification.
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub service: ServiceRef,
}

/// Callback for bind notifications.
pub type BindHandler = Handler<Binding>;

#[derive(Default)]
struct Registry {
    services: HashMap<String, ServiceRef>,
    /// Bind order.
    order: Vec<String>,
}

struct Inner {
    registry: RwLock<Registry>,
    binds: CommBus<Binding>,
    events: CommBus<Value>,
}

/// The live service registry and notification bus. Cheap to clone.
#[derive(Clone)]
pub struct Backbone {
    inner: Arc<Inner>,
}

impl fmt::Debug for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backbone")
            .field("services", &self.names())
            .finish_non_exhaustive()
    }
}

impl Backbone {
    /// Create an empty backbone. Use [`Backbone::start`] to build one from layers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::default()),
                binds: CommBus::new(),
                events: CommBus::new(),
            }),
        }
    }

    /// Build a backbone from an ordered layer list.
    pub async fn start(layers: Vec<ServiceLayer>) -> Result<Self> {
        let backbone = Self::new();
        backbone.load(layers).await?;
        Ok(backbone)
    }

    /// Instantiate and bind `layers` in order.
    ///
    /// Every descriptor in a layer is resolved concurrently; the whole layer is
    /// bound before the next layer starts resolving.
    pub async fn load(&self, layers: Vec<ServiceLayer>) -> Result<()> {
        validate_layers(&layers)?;

        let layer_count = layers.len();
        for (index, layer) in layers.into_iter().enumerate() {
            let names: Vec<String> = layer.names().map(str::to_string).collect();
            tracing::debug!(layer = index, services = ?names, "resolving layer");

            let pending = layer
                .into_entries()
                .into_iter()
                .map(|(name, descriptor)| self.resolve(name, descriptor))
                .collect::<Result<Vec<_>>>()?;
            let built = try_join_all(pending).await?;

            for (name, service) in built {
                self.bind(&name, service)?;
            }
        }

        tracing::debug!(layers = layer_count, services = self.len(), "backbone started");
        Ok(())
    }

    /// Look up backward dependencies now; return the pending build.
    fn resolve(
        &self,
        name: String,
        descriptor: ServiceDescriptor,
    ) -> Result<BoxFuture<'static, Result<(String, ServiceRef)>>> {
        let factory = match descriptor {
            ServiceDescriptor::Ready(service) => {
                return Ok(Box::pin(async move { Ok((name, service)) }))
            }
            ServiceDescriptor::Factory(factory) => factory,
        };

        let deps = factory
            .dependencies()
            .iter()
            .map(|dep| self.get(dep).ok_or_else(|| Error::unresolved(dep, &name)))
            .collect::<Result<Vec<_>>>()?;

        let build = factory.invoke(FactoryContext::new(self.clone(), name.clone()), deps);
        Ok(Box::pin(async move {
            match build.await {
                Ok(service) => Ok((name, service)),
                Err(err) => {
                    tracing::debug!(service = %name, error = %err, "factory failed");
                    Err(Error::factory_failed(name, err.to_string()))
                }
            }
        }))
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Bind `service` under `name` and publish a bind notification.
    pub fn bind(&self, name: &str, service: ServiceRef) -> Result<()> {
        {
            let mut registry = self.inner.registry.write();
            if registry.services.contains_key(name) {
                return Err(Error::DuplicateBinding(name.to_string()));
            }
            registry.services.insert(name.to_string(), service.clone());
            registry.order.push(name.to_string());
        }

        tracing::debug!(service = name, "service bound");
        let binding = Binding {
            name: name.to_string(),
            service,
        };
        self.inner.binds.publish(&bind_topic(name), &binding);
        self.inner.binds.publish(SERVICE_BIND, &binding);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ServiceRef> {
        self.inner.registry.read().services.get(name).cloned()
    }

    /// Look up a service and recover its concrete type.
    pub fn get_as<T: Service>(&self, name: &str) -> Option<Arc<T>> {
        self.get(name).and_then(|svc| downcast::<T>(&svc))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.registry.read().services.contains_key(name)
    }

    /// Bound names in bind order.
    pub fn names(&self) -> Vec<String> {
        self.inner.registry.read().order.clone()
    }

    /// Snapshot of all bindings in bind order.
    pub fn bindings(&self) -> Vec<Binding> {
        let registry = self.inner.registry.read();
        registry
            .order
            .iter()
            .filter_map(|name| {
                registry.services.get(name).map(|service| Binding {
                    name: name.clone(),
                    service: service.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.registry.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Forward and conforming dependencies
    // =========================================================================

    /// Call `callback` when `name` is bound.
    ///
    /// If `name` is already bound the callback runs synchronously and no
    /// subscription is kept (bound names are permanent). Otherwise it runs on
    /// the bind notification; with `once` the subscription then removes itself.
    pub fn on_service_bind<F>(&self, name: &str, callback: F, once: bool) -> Option<Subscription>
    where
        F: Fn(&Binding) + Send + Sync + 'static,
    {
        let callback: BindHandler = Arc::new(callback);
        let existing = {
            // Subscribing under the read lock keeps a concurrent bind from
            // slipping between the lookup and the subscription.
            let registry = self.inner.registry.read();
            match registry.services.get(name) {
                Some(service) => service.clone(),
                None => {
                    let topic = bind_topic(name);
                    let subscription = if once {
                        self.inner.binds.once(&topic, callback)
                    } else {
                        self.inner.binds.subscribe(&topic, callback)
                    };
                    return Some(subscription);
                }
            }
        };

        callback(&Binding {
            name: name.to_string(),
            service: existing,
        });
        None
    }

    /// Cancel a subscription returned by a bind-notification registration.
    pub fn off_service_bind(&self, subscription: &Subscription) -> bool {
        self.inner.binds.unsubscribe(subscription)
    }

    /// Names of bound services conforming to `descriptor`, in bind order.
    pub fn list_conforming_services(
        &self,
        descriptor: impl Into<InterfaceDescriptor>,
    ) -> Result<Vec<String>> {
        let iface = Interface::compile(descriptor)?;
        Ok(self
            .bindings()
            .into_iter()
            .filter(|b| iface.matches(b.service.as_ref()))
            .map(|b| b.name)
            .collect())
    }

    /// Call `callback` for every bound service conforming to `descriptor`,
    /// now and for each conforming service bound later.
    pub fn on_conforming_service_bind<F>(
        &self,
        descriptor: impl Into<InterfaceDescriptor>,
        callback: F,
    ) -> Result<Subscription>
    where
        F: Fn(&Binding) + Send + Sync + 'static,
    {
        let iface = Interface::compile(descriptor)?;
        let callback: BindHandler = Arc::new(callback);

        let (existing, subscription) = {
            let registry = self.inner.registry.read();
            let filter = iface.clone();
            let on_bind = callback.clone();
            let subscription = self.inner.binds.subscribe(
                SERVICE_BIND,
                Arc::new(move |binding: &Binding| {
                    if filter.matches(binding.service.as_ref()) {
                        on_bind(binding);
                    }
                }),
            );
            let existing: Vec<Binding> = registry
                .order
                .iter()
                .filter_map(|name| {
                    registry.services.get(name).map(|service| Binding {
                        name: name.clone(),
                        service: service.clone(),
                    })
                })
                .collect();
            (existing, subscription)
        };

        for binding in existing
            .iter()
            .filter(|b| iface.matches(b.service.as_ref()))
        {
            callback(binding);
        }
        Ok(subscription)
    }

    // =========================================================================
    // Application events
    // =========================================================================

    /// Publish an application event on the backbone's own bus.
    pub fn publish(&self, event: &str, payload: &Value) -> usize {
        self.inner.events.publish(event, payload)
    }

    /// Subscribe to an unqualified event on the backbone's own bus.
    pub fn subscribe<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(event, Arc::new(handler))
    }

    /// Cancel a subscription returned by [`Backbone::subscribe`], [`Backbone::on`]
    /// or [`Backbone::once`].
    pub fn off(&self, subscription: &Subscription) -> bool {
        self.inner.events.unsubscribe(subscription)
    }

    /// Subscribe to a possibly-scoped event (`"scope:event"`).
    ///
    /// Unscoped events return a [`Subscription`] for [`Backbone::off`]. Scoped
    /// subscriptions are owned by the target service and return `None`.
    pub fn on<F>(&self, event: &str, handler: F) -> Result<Option<Subscription>>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.route(event, Arc::new(handler), false)
    }

    /// Subscribe to the next emission of a possibly-scoped event.
    pub fn once<F>(&self, event: &str, handler: F) -> Result<Option<Subscription>>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.route(event, Arc::new(handler), true)
    }

    fn route(
        &self,
        event: &str,
        handler: EventHandler,
        once: bool,
    ) -> Result<Option<Subscription>> {
        let (scope, rest) = match ScopedName::parse(event) {
            ScopedName::Local(name) => {
                let subscription = if once {
                    self.inner.events.once(name, handler)
                } else {
                    self.inner.events.subscribe(name, handler)
                };
                return Ok(Some(subscription));
            }
            ScopedName::Delegate { scope, rest } => (scope, rest),
        };

        if let Some(service) = self.get(scope) {
            return delegate(&service, scope, rest, handler, once).map(|()| None);
        }

        tracing::debug!(scope, event = rest, "deferring scoped subscription until bind");
        let rest = rest.to_string();
        self.on_service_bind(
            scope,
            move |binding| {
                if let Err(err) = delegate(&binding.service, &binding.name, &rest, handler.clone(), once)
                {
                    tracing::warn!(scope = %binding.name, error = %err, "deferred subscription failed");
                }
            },
            true,
        );
        Ok(None)
    }
}

fn delegate(
    service: &ServiceRef,
    scope: &str,
    event: &str,
    handler: EventHandler,
    once: bool,
) -> Result<()> {
    let target = service.event_scope().ok_or_else(|| {
        Error::validation(format!("service '{scope}' does not accept event subscriptions"))
    })?;
    if once {
        target.once(event, handler)
    } else {
        target.on(event, handler)
    }
}

impl Default for Backbone {
    fn default() -> Self {
        Self::new()
    }
}

impl EventScope for Backbone {
    fn on(&self, event: &str, handler: EventHandler) -> Result<()> {
        self.route(event, handler, false).map(drop)
    }

    fn once(&self, event: &str, handler: EventHandler) -> Result<()> {
        self.route(event, handler, true).map(drop)
    }
}

/// A backbone can itself be bound as a service, exposing its registry
/// as members and its bus for nested scoped routing.
impl Service for Backbone {
    fn member(&self, name: &str) -> Option<Member> {
        self.get(name).map(Member::Service)
    }

    fn event_scope(&self) -> Option<&dyn EventScope> {
        Some(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::Kind;
    use crate::service::{operation, ServiceObject};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const NO_DEPS: [&str; 0] = [];

    fn obj() -> ServiceRef {
        ServiceObject::new().into_ref()
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Binding) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_b: &Binding| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    // =========================================================================
    // Startup
    // =========================================================================

    #[tokio::test]
    async fn test_start_binds_in_layer_order() {
        let backbone = Backbone::start(vec![
            ServiceLayer::new().ready("settings", obj()),
            ServiceLayer::new()
                .factory("db", ["settings"], |_ctx, _deps| async { Ok(obj()) })
                .factory("cache", ["settings"], |_ctx, _deps| async { Ok(obj()) }),
            ServiceLayer::new().factory("http", ["db", "cache"], |_ctx, _deps| async {
                Ok(obj())
            }),
        ])
        .await
        .unwrap();

        assert_eq!(backbone.names(), vec!["settings", "db", "cache", "http"]);
    }

    #[tokio::test]
    async fn test_empty_layer_list_is_configuration_error() {
        let err = Backbone::start(vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_later_layer_reference_is_unresolved() {
        let err = Backbone::start(vec![
            ServiceLayer::new().factory("http", ["db"], |_ctx, _deps| async { Ok(obj()) }),
            ServiceLayer::new().ready("db", obj()),
        ])
        .await
        .unwrap_err();

        match err {
            Error::UnresolvedDependency {
                dependency,
                dependent,
            } => {
                assert_eq!(dependency, "db");
                assert_eq!(dependent, "http");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_same_layer_reference_is_unresolved() {
        let err = Backbone::start(vec![ServiceLayer::new()
            .ready("db", obj())
            .factory("http", ["db"], |_ctx, _deps| async { Ok(obj()) })])
        .await
        .unwrap_err();
        assert_eq!(err.code(), "UNRESOLVED_DEPENDENCY");
    }

    #[tokio::test]
    async fn test_factory_receives_dependencies_in_declared_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        Backbone::start(vec![
            ServiceLayer::new()
                .ready("a", ServiceObject::new().with_value("id", json!("a")).into_ref())
                .ready("b", ServiceObject::new().with_value("id", json!("b")).into_ref()),
            ServiceLayer::new().factory("c", ["b", "a"], move |_ctx, deps| {
                let sink = sink.clone();
                async move {
                    for dep in &deps {
                        if let Some(Member::Value(id)) = dep.member("id") {
                            sink.lock().push(id);
                        }
                    }
                    Ok(obj())
                }
            }),
        ])
        .await
        .unwrap();

        assert_eq!(*seen.lock(), vec![json!("b"), json!("a")]);
    }

    #[tokio::test]
    async fn test_layer_barrier_binds_before_next_layer() {
        let observed = Arc::new(Mutex::new(None));
        let sink = observed.clone();
        Backbone::start(vec![
            ServiceLayer::new().factory("slow", NO_DEPS, |_ctx, _deps| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(obj())
            }),
            ServiceLayer::new().factory("observer", NO_DEPS, move |ctx, _deps| {
                *sink.lock() = Some(ctx.backbone().contains("slow"));
                async { Ok(obj()) }
            }),
        ])
        .await
        .unwrap();

        assert_eq!(*observed.lock(), Some(true));
    }

    #[tokio::test]
    async fn test_layer_factories_run_concurrently() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let (b1, b2) = (barrier.clone(), barrier);
        let layer = ServiceLayer::new()
            .factory("a", NO_DEPS, move |_ctx, _deps| {
                let b = b1.clone();
                async move {
                    b.wait().await;
                    Ok(obj())
                }
            })
            .factory("b", NO_DEPS, move |_ctx, _deps| {
                let b = b2.clone();
                async move {
                    b.wait().await;
                    Ok(obj())
                }
            });

        let backbone = tokio::time::timeout(Duration::from_secs(5), Backbone::start(vec![layer]))
            .await
            .expect("factories in one layer must not run sequentially")
            .unwrap();
        assert_eq!(backbone.len(), 2);
    }

    #[tokio::test]
    async fn test_factory_failure_keeps_earlier_bindings() {
        let backbone = Backbone::new();
        let err = backbone
            .load(vec![
                ServiceLayer::new().ready("settings", obj()),
                ServiceLayer::new().factory("db", ["settings"], |_ctx, _deps| async {
                    Err(Error::internal("connection refused"))
                }),
            ])
            .await
            .unwrap_err();

        match err {
            Error::FactoryFailed { service, reason } => {
                assert_eq!(service, "db");
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(backbone.contains("settings"));
        assert!(!backbone.contains("db"));
    }

    #[tokio::test]
    async fn test_factory_context_names_service() {
        let name = Arc::new(Mutex::new(String::new()));
        let sink = name.clone();
        Backbone::start(vec![ServiceLayer::new().factory("db", NO_DEPS, move |ctx, _| {
            *sink.lock() = ctx.service_name().to_string();
            async { Ok(obj()) }
        })])
        .await
        .unwrap();
        assert_eq!(*name.lock(), "db");
    }

    // =========================================================================
    // Binding
    // =========================================================================

    #[test]
    fn test_rebinding_is_rejected() {
        let backbone = Backbone::new();
        backbone.bind("db", obj()).unwrap();
        let err = backbone.bind("db", obj()).unwrap_err();
        assert!(matches!(err, Error::DuplicateBinding(name) if name == "db"));
        assert_eq!(backbone.len(), 1);
    }

    #[test]
    fn test_get_as_downcasts() {
        let backbone = Backbone::new();
        backbone
            .bind("settings", ServiceObject::new().with_value("port", json!(8080)).into_ref())
            .unwrap();
        let settings = backbone.get_as::<ServiceObject>("settings").unwrap();
        assert_eq!(settings.value("port"), Some(&json!(8080)));
        assert!(backbone.get_as::<Backbone>("settings").is_none());
    }

    // =========================================================================
    // Forward dependencies
    // =========================================================================

    #[test]
    fn test_on_service_bind_before_bind_fires_once() {
        let backbone = Backbone::new();
        let (count, callback) = counter();
        assert!(backbone.on_service_bind("db", callback, true).is_some());

        backbone.bind("other", obj()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        backbone.bind("db", obj()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        backbone.bind("later", obj()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_service_bind_after_bind_fires_synchronously() {
        let backbone = Backbone::new();
        backbone.bind("db", obj()).unwrap();

        let (count, callback) = counter();
        assert!(backbone.on_service_bind("db", callback, true).is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        backbone.bind("unrelated", obj()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_service_bind_cancels() {
        let backbone = Backbone::new();
        let (count, callback) = counter();
        let subscription = backbone.on_service_bind("db", callback, false).unwrap();
        assert!(backbone.off_service_bind(&subscription));

        backbone.bind("db", obj()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // Conforming dependencies
    // =========================================================================

    fn queryable() -> ServiceRef {
        ServiceObject::new()
            .with_operation("query", operation(|_| async { Ok(Value::Null) }))
            .into_ref()
    }

    #[test]
    fn test_list_conforming_services() {
        let backbone = Backbone::new();
        backbone.bind("pg", queryable()).unwrap();
        backbone.bind("settings", obj()).unwrap();
        backbone.bind("sqlite", queryable()).unwrap();

        let desc = InterfaceDescriptor::shape().expect("query", Kind::Function);
        assert_eq!(
            backbone.list_conforming_services(desc).unwrap(),
            vec!["pg", "sqlite"]
        );
    }

    #[test]
    fn test_on_conforming_service_bind_now_and_later() {
        let backbone = Backbone::new();
        backbone.bind("pg", queryable()).unwrap();
        backbone.bind("settings", obj()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let desc = InterfaceDescriptor::shape().expect("query", Kind::Function);
        backbone
            .on_conforming_service_bind(desc, move |b| sink.lock().push(b.name.clone()))
            .unwrap();
        assert_eq!(*seen.lock(), vec!["pg"]);

        backbone.bind("cache", obj()).unwrap();
        backbone.bind("sqlite", queryable()).unwrap();
        backbone.bind("mysql", queryable()).unwrap();
        assert_eq!(*seen.lock(), vec!["pg", "sqlite", "mysql"]);
    }

    #[test]
    fn test_conforming_with_malformed_descriptor_fails() {
        let backbone = Backbone::new();
        let err = backbone
            .on_conforming_service_bind(["a", "a"], |_b| {})
            .unwrap_err();
        assert_eq!(err.code(), "INTERFACE_COMPILE");
    }

    // =========================================================================
    // Scoped events
    // =========================================================================

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &Value| sink.lock().push(v.clone()))
    }

    #[test]
    fn test_unqualified_and_empty_scope_use_own_bus() {
        let backbone = Backbone::new();
        let (seen, handler) = recorder();
        backbone.on("ready", handler).unwrap();
        let (seen_empty, handler) = recorder();
        backbone.on(":ready", handler).unwrap();

        backbone.publish("ready", &json!(1));
        assert_eq!(*seen.lock(), vec![json!(1)]);
        assert_eq!(*seen_empty.lock(), vec![json!(1)]);
    }

    #[test]
    fn test_unscoped_on_can_be_cancelled() {
        let backbone = Backbone::new();
        let (seen, handler) = recorder();
        let subscription = backbone.on("ready", handler).unwrap().expect("local subscription");

        backbone.publish("ready", &json!(1));
        assert!(backbone.off(&subscription));
        backbone.publish("ready", &json!(2));
        assert_eq!(*seen.lock(), vec![json!(1)]);

        assert!(backbone.once("db:connected", |_v| {}).unwrap().is_none());
    }

    #[test]
    fn test_scoped_subscription_delegates_to_bound_service() {
        let backbone = Backbone::new();
        let db = Arc::new(ServiceObject::new().with_events());
        backbone.bind("db", db.clone()).unwrap();

        let (seen, handler) = recorder();
        backbone.on("db:connected", handler).unwrap();
        db.emit("connected", &json!("pg"));
        assert_eq!(*seen.lock(), vec![json!("pg")]);
    }

    #[test]
    fn test_scoped_subscription_deferred_until_bind() {
        let backbone = Backbone::new();
        let (seen, handler) = recorder();
        backbone.once("db:connected", handler).unwrap();

        let db = Arc::new(ServiceObject::new().with_events());
        backbone.bind("db", db.clone()).unwrap();
        db.emit("connected", &json!(1));
        db.emit("connected", &json!(2));
        assert_eq!(*seen.lock(), vec![json!(1)]);
    }

    #[test]
    fn test_scope_without_event_capability_fails() {
        let backbone = Backbone::new();
        backbone.bind("settings", obj()).unwrap();
        let err = backbone.on("settings:changed", |_v| {}).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_nested_backbone_scopes_recursively() {
        let outer = Backbone::new();
        let inner = Backbone::new();
        let db = Arc::new(ServiceObject::new().with_events());
        inner.bind("db", db.clone()).unwrap();
        outer.bind("storage", Arc::new(inner.clone())).unwrap();

        let (seen, handler) = recorder();
        outer.on("storage:db:connected", handler).unwrap();
        let (seen_inner_bus, handler) = recorder();
        outer.on("storage:flushed", handler).unwrap();

        db.emit("connected", &json!("ok"));
        inner.publish("flushed", &json!(3));
        assert_eq!(*seen.lock(), vec![json!("ok")]);
        assert_eq!(*seen_inner_bus.lock(), vec![json!(3)]);
    }
}
