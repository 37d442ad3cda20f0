//! Layer configuration: descriptors, factories, and their execution context.

use futures::future::BoxFuture;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::Backbone;
use crate::service::ServiceRef;
use crate::types::{Error, Result};

/// Builds one service from its resolved backward dependencies.
pub type BuildFn =
    Arc<dyn Fn(FactoryContext, Vec<ServiceRef>) -> BoxFuture<'static, Result<ServiceRef>> + Send + Sync>;

/// Execution context handed to every factory.
///
/// Gives the factory body access to binding notifications and the event bus
/// without those being part of its dependency list.
#[derive(Debug, Clone)]
pub struct FactoryContext {
    backbone: Backbone,
    service: String,
}

impl FactoryContext {
    pub(crate) fn new(backbone: Backbone, service: String) -> Self {
        Self { backbone, service }
    }

    /// The backbone being started.
    pub fn backbone(&self) -> &Backbone {
        &self.backbone
    }

    /// Name the built service will be bound under.
    pub fn service_name(&self) -> &str {
        &self.service
    }
}

/// A service factory with an explicit dependency-name list.
#[derive(Clone)]
pub struct Factory {
    dependencies: Vec<String>,
    build: BuildFn,
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl Factory {
    /// `build` receives the services named in `dependencies`, in that order.
    pub fn new<I, S, F, Fut>(dependencies: I, build: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(FactoryContext, Vec<ServiceRef>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServiceRef>> + Send + 'static,
    {
        Self {
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            build: Arc::new(move |ctx, deps| Box::pin(build(ctx, deps))),
        }
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub(crate) fn invoke(
        &self,
        ctx: FactoryContext,
        deps: Vec<ServiceRef>,
    ) -> BoxFuture<'static, Result<ServiceRef>> {
        (self.build)(ctx, deps)
    }
}

/// Either a ready-made service or a factory that builds one.
#[derive(Debug, Clone)]
pub enum ServiceDescriptor {
    Ready(ServiceRef),
    Factory(Factory),
}

impl From<ServiceRef> for ServiceDescriptor {
    fn from(service: ServiceRef) -> Self {
        ServiceDescriptor::Ready(service)
    }
}

impl From<Factory> for ServiceDescriptor {
    fn from(factory: Factory) -> Self {
        ServiceDescriptor::Factory(factory)
    }
}

/// An ordered stage of named service descriptors.
#[derive(Debug, Clone, Default)]
pub struct ServiceLayer {
    entries: Vec<(String, ServiceDescriptor)>,
}

impl ServiceLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor under `name`.
    pub fn with(mut self, name: impl Into<String>, descriptor: impl Into<ServiceDescriptor>) -> Self {
        self.entries.push((name.into(), descriptor.into()));
        self
    }

    /// Add a ready-made service.
    pub fn ready(self, name: impl Into<String>, service: ServiceRef) -> Self {
        self.with(name, ServiceDescriptor::Ready(service))
    }

    /// Add a factory.
    pub fn factory<I, S, F, Fut>(self, name: impl Into<String>, dependencies: I, build: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(FactoryContext, Vec<ServiceRef>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServiceRef>> + Send + 'static,
    {
        self.with(name, Factory::new(dependencies, build))
    }

    /// Service names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, ServiceDescriptor)> {
        self.entries
    }
}

/// Check the layer list shape: non-empty, names non-empty and globally unique.
pub fn validate_layers(layers: &[ServiceLayer]) -> Result<()> {
    if layers.is_empty() {
        return Err(Error::configuration("layer list cannot be empty"));
    }

    let mut seen = HashSet::new();
    for (index, layer) in layers.iter().enumerate() {
        for name in layer.names() {
            if name.is_empty() {
                return Err(Error::configuration(format!(
                    "layer {index} contains a service with an empty name"
                )));
            }
            if !seen.insert(name) {
                return Err(Error::configuration(format!(
                    "service '{name}' is declared more than once (layer {index})"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceObject;

    fn svc() -> ServiceRef {
        ServiceObject::new().into_ref()
    }

    #[test]
    fn test_empty_layer_list_rejected() {
        let err = validate_layers(&[]).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION");
    }

    #[test]
    fn test_duplicate_across_layers_rejected() {
        let layers = vec![
            ServiceLayer::new().ready("settings", svc()),
            ServiceLayer::new().ready("settings", svc()),
        ];
        let err = validate_layers(&layers).unwrap_err();
        assert!(err.to_string().contains("settings"));
    }

    #[test]
    fn test_duplicate_within_layer_rejected() {
        let layers = vec![ServiceLayer::new().ready("a", svc()).ready("a", svc())];
        assert!(validate_layers(&layers).is_err());
    }

    #[test]
    fn test_empty_inner_layer_is_allowed() {
        let layers = vec![ServiceLayer::new(), ServiceLayer::new().ready("a", svc())];
        assert!(validate_layers(&layers).is_ok());
    }

    #[test]
    fn test_factory_keeps_dependency_order() {
        let factory = Factory::new(["settings", "db"], |_ctx, _deps| async {
            Ok(ServiceObject::new().into_ref())
        });
        assert_eq!(factory.dependencies(), ["settings", "db"]);
    }
}
