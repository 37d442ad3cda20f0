//! Communication bus for in-process publish/subscribe.
//!
//! The bus is the notification spine of the backbone. It carries:
//!   - **Bind notifications**: "service X has just been bound"
//!   - **Application events**: arbitrary named payloads
//!   - **Remote events**: payloads re-emitted locally by a client or host
//!
//! Handlers run synchronously on the publishing task, after the subscriber
//! table lock has been released, so a handler may freely subscribe,
//! unsubscribe, or publish again.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::SubscriptionId;

/// Callback invoked with each published payload.
pub type Handler<P> = Arc<dyn Fn(&P) + Send + Sync>;

// =============================================================================
// Subscriber Management
// =============================================================================

struct Subscriber<P> {
    id: SubscriptionId,
    once: bool,
    handler: Handler<P>,
}

impl<P> fmt::Debug for Subscriber<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("once", &self.once)
            .finish_non_exhaustive()
    }
}

/// Subscription receipt for managing subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: String,
}

/// Statistics about bus usage.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BusStats {
    pub events_published: u64,
    pub deliveries: u64,
    pub active_subscribers: usize,
}

// =============================================================================
// CommBus - In-Memory Notification Bus
// =============================================================================

/// In-memory publish/subscribe bus, generic over its payload type.
pub struct CommBus<P> {
    /// topic -> subscribers in registration order
    subscribers: RwLock<HashMap<String, Vec<Subscriber<P>>>>,
    next_id: AtomicU64,
    stats: Mutex<BusStats>,
}

impl<P> fmt::Debug for CommBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommBus")
            .field("stats", &*self.stats.lock())
            .finish_non_exhaustive()
    }
}

impl<P> CommBus<P> {
    /// Create a new, empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats: Mutex::new(BusStats::default()),
        }
    }

    // =========================================================================
    // Pub/Sub
    // =========================================================================

    /// Publish a payload to every subscriber of `topic`.
    ///
    /// Returns the number of handlers invoked. `once` subscribers are removed
    /// before any handler runs, so re-entrant publishes never reach them twice.
    pub fn publish(&self, topic: &str, payload: &P) -> usize {
        let handlers: Vec<Handler<P>> = {
            let mut subscribers = self.subscribers.write();
            match subscribers.get_mut(topic) {
                Some(subs) => {
                    let handlers: Vec<_> = subs.iter().map(|s| s.handler.clone()).collect();
                    subs.retain(|s| !s.once);
                    self.stats.lock().active_subscribers -= handlers.len() - subs.len();
                    if subs.is_empty() {
                        subscribers.remove(topic);
                    }
                    handlers
                }
                None => Vec::new(),
            }
        };

        for handler in &handlers {
            handler(payload);
        }

        let delivered = handlers.len();
        {
            let mut stats = self.stats.lock();
            stats.events_published += 1;
            stats.deliveries += delivered as u64;
        }

        tracing::trace!(topic, delivered, "published");
        delivered
    }

    /// Subscribe `handler` to every future publish on `topic`.
    pub fn subscribe(&self, topic: &str, handler: Handler<P>) -> Subscription {
        self.insert(topic, handler, false)
    }

    /// Subscribe `handler` to the next publish on `topic` only.
    pub fn once(&self, topic: &str, handler: Handler<P>) -> Subscription {
        self.insert(topic, handler, true)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(subs) = subscribers.get_mut(&subscription.topic) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != subscription.id);
        let removed = before - subs.len();
        if subs.is_empty() {
            subscribers.remove(&subscription.topic);
        }
        self.stats.lock().active_subscribers -= removed;
        removed > 0
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.read().get(topic).map_or(0, Vec::len)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get current bus statistics.
    pub fn get_stats(&self) -> BusStats {
        self.stats.lock().clone()
    }

    /// Reset statistics counters.
    pub fn reset_stats(&self) {
        let mut stats = self.stats.lock();
        stats.events_published = 0;
        stats.deliveries = 0;
    }

    fn insert(&self, topic: &str, handler: Handler<P>, once: bool) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut subscribers = self.subscribers.write();
            subscribers
                .entry(topic.to_string())
                .or_default()
                .push(Subscriber { id, once, handler });
            // active_subscribers only changes under the table lock.
            self.stats.lock().active_subscribers += 1;
        }

        tracing::trace!(topic, once, "subscribed");
        Subscription {
            id,
            topic: topic.to_string(),
        }
    }
}

impl<P> Default for CommBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
