//! Cache Events Module
//!
//! Subscriber lists for insertion, eviction and clear events.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::cache::Item;

// == Eviction Reason ==
/// Why an item left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// The item's expiration passed
    Expired,
    /// The caller deleted the item
    Deleted,
    /// The item was the oldest when a new key arrived at capacity
    CapacityReached,
    /// The whole cache was cleared. Reported through the clear event, not
    /// through per-item eviction events.
    ClearedAll,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionReason::Expired => "expired",
            EvictionReason::Deleted => "deleted",
            EvictionReason::CapacityReached => "capacity_reached",
            EvictionReason::ClearedAll => "cleared_all",
        };
        f.write_str(name)
    }
}

// == Handlers ==
/// Called with every item stored by `set`.
pub type InsertionHandler<K, V> = Arc<dyn Fn(&Item<K, V>) + Send + Sync>;
/// Called with every evicted item and the reason.
pub type EvictionHandler<K, V> = Arc<dyn Fn(EvictionReason, &Item<K, V>) + Send + Sync>;
/// Called once per `delete_all` with the number of items dropped.
pub type ClearHandler = Arc<dyn Fn(usize) + Send + Sync>;

/// Handle returned by subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// == Subscribers ==
/// Ordered handler lists, one per event kind.
///
/// Firing clones the relevant list under the read lock and calls the
/// handlers after releasing it, so handlers may subscribe or unsubscribe.
pub(crate) struct Subscribers<K, V> {
    next_id: AtomicU64,
    insertion: RwLock<Vec<(SubscriptionId, InsertionHandler<K, V>)>>,
    eviction: RwLock<Vec<(SubscriptionId, EvictionHandler<K, V>)>>,
    clear: RwLock<Vec<(SubscriptionId, ClearHandler)>>,
}

impl<K, V> Subscribers<K, V> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            insertion: RwLock::new(Vec::new()),
            eviction: RwLock::new(Vec::new()),
            clear: RwLock::new(Vec::new()),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // == Subscribe ==

    pub fn on_insertion<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Item<K, V>) + Send + Sync + 'static,
    {
        let handler: InsertionHandler<K, V> = Arc::new(handler);
        let id = self.next_id();
        self.insertion.write().push((id, handler));
        id
    }

    pub fn on_eviction<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(EvictionReason, &Item<K, V>) + Send + Sync + 'static,
    {
        let handler: EvictionHandler<K, V> = Arc::new(handler);
        let id = self.next_id();
        self.eviction.write().push((id, handler));
        id
    }

    pub fn on_clear<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let handler: ClearHandler = Arc::new(handler);
        let id = self.next_id();
        self.clear.write().push((id, handler));
        id
    }

    /// Removes a handler from whichever list holds it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        remove_handler(&self.insertion, id)
            || remove_handler(&self.eviction, id)
            || remove_handler(&self.clear, id)
    }

    // == Fire ==

    pub fn fire_insertion(&self, item: &Item<K, V>) {
        for handler in snapshot(&self.insertion) {
            handler(item);
        }
    }

    pub fn fire_evictions(&self, reason: EvictionReason, items: &[Item<K, V>]) {
        if items.is_empty() {
            return;
        }
        let handlers = snapshot(&self.eviction);
        for item in items {
            for handler in &handlers {
                handler(reason, item);
            }
        }
    }

    pub fn fire_clear(&self, cleared: usize) {
        for handler in snapshot(&self.clear) {
            handler(cleared);
        }
    }
}

impl<K, V> fmt::Debug for Subscribers<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("insertion", &self.insertion.read().len())
            .field("eviction", &self.eviction.read().len())
            .field("clear", &self.clear.read().len())
            .finish()
    }
}

fn snapshot<H: Clone>(list: &RwLock<Vec<(SubscriptionId, H)>>) -> Vec<H> {
    list.read().iter().map(|(_, handler)| handler.clone()).collect()
}

fn remove_handler<H>(list: &RwLock<Vec<(SubscriptionId, H)>>, id: SubscriptionId) -> bool {
    let mut list = list.write();
    let before = list.len();
    list.retain(|(existing, _)| *existing != id);
    list.len() != before
}
