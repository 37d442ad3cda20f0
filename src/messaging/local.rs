//! Collapsed single-process mode.
//!
//! A [`LocalService`] runs the same [`ServiceDefinition`] without any
//! channel: messages invoke their handlers directly, methods are local
//! operations, and events go to the service's own bus.

use serde_json::Value;
use std::sync::Arc;

use super::definition::{Executor, ServiceDefinition};
use super::protocol::Fault;
use crate::commbus::Subscription;
use crate::service::{EventScope, Member, Operation, Service, ServiceRef};
use crate::types::Result;

#[derive(Debug, Clone)]
pub struct LocalService {
    executor: Arc<Executor>,
}

impl LocalService {
    pub fn new(definition: ServiceDefinition) -> Result<Self> {
        let executor = Executor::new(definition)?;
        tracing::debug!(service = %executor.handle().name(), "local service ready");
        Ok(Self {
            executor: Arc::new(executor),
        })
    }

    pub fn name(&self) -> &str {
        self.executor.handle().name()
    }

    /// Invoke a message handler directly.
    pub async fn call(&self, message: &str, args: Vec<Value>) -> std::result::Result<Value, Fault> {
        self.executor.call(message, args).await
    }

    pub async fn call_method(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.executor.handle().call_method(method, args).await
    }

    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.executor.handle().emit(event, payload)
    }

    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.executor.handle().events().subscribe(event, Arc::new(handler))
    }

    pub fn once<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.executor.handle().events().once(event, Arc::new(handler))
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        self.executor.handle().events().unsubscribe(subscription)
    }

    pub fn into_ref(self) -> ServiceRef {
        Arc::new(self)
    }
}

impl Service for LocalService {
    fn member(&self, name: &str) -> Option<Member> {
        self.executor.member(name)
    }

    fn operation(&self, name: &str) -> Option<Operation> {
        self.executor.operation(name)
    }

    fn event_scope(&self) -> Option<&dyn EventScope> {
        Some(&**self.executor.handle().events())
    }
}
