//! Cache Engine Module
//!
//! Thread-safe cache handle: one lock around the store, event delivery
//! outside the lock, lazy loading on miss, and control of the sweeper.

use std::fmt;
use std::hash::Hash;
use std::slice;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::events::Subscribers;
use crate::cache::{
    EvictionReason, Item, Loader, Lookup, Metrics, SetOutcome, Store, SubscriptionId, Ttl,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_sweeper, SweeperControl};

// == Cache ==
/// In-memory cache with per-item TTL, optional capacity and lazy loading.
///
/// `Cache` is a cheap handle; clones share the same entries.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use ttlcache::{Cache, Ttl};
///
/// let cache: Cache<String, u32> = Cache::builder()
///     .ttl(Duration::from_secs(30))
///     .capacity(2)
///     .build()
///     .unwrap();
///
/// cache.set("a".to_string(), 1, Ttl::Default);
/// cache.set("b".to_string(), 2, Ttl::Never);
/// assert_eq!(cache.get(&"a".to_string()).unwrap().map(|item| *item.value()), Some(1));
/// assert_eq!(cache.len(), 2);
/// ```
pub struct Cache<K, V> {
    shared: Arc<Shared<K, V>>,
}

struct Shared<K, V> {
    store: RwLock<Store<K, V>>,
    subscribers: Subscribers<K, V>,
    loader: Option<Arc<dyn Loader<K, V>>>,
    clock: Arc<dyn Clock>,
    sweeper: SweeperControl,
}

/// Non-owning handle held by the sweeper.
pub(crate) struct WeakCache<K, V> {
    shared: Weak<Shared<K, V>>,
}

impl<K, V> WeakCache<K, V> {
    /// Returns a cache handle, or None once every `Cache` has been dropped.
    pub fn upgrade(&self) -> Option<Cache<K, V>> {
        self.shared.upgrade().map(|shared| Cache { shared })
    }
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("subscribers", &self.shared.subscribers)
            .field("has_loader", &self.shared.loader.is_some())
            .field("clock", &self.shared.clock)
            .finish_non_exhaustive()
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates an unbounded cache whose default TTL never expires.
    pub fn new() -> Self {
        CacheBuilder::new().assemble()
    }

    /// Starts building a cache.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    /// Creates a cache from a configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        CacheBuilder::new().config(config.clone()).build()
    }

    // == Set ==
    /// Stores a value, replacing any existing value for the key.
    ///
    /// If the key is new and the cache is at capacity, the item closest to
    /// expiry is evicted first with [`EvictionReason::CapacityReached`].
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - The value to store
    /// * `ttl` - [`Ttl::Default`], [`Ttl::Never`] or a duration
    pub fn set(&self, key: K, value: V, ttl: impl Into<Ttl>) -> Item<K, V> {
        let outcome = {
            let mut store = self.shared.store.write();
            let now = self.shared.clock.now();
            store.set(key, value, ttl.into(), now)
        };
        self.stored(outcome)
    }

    // == Get ==
    /// Retrieves a live item, sliding its expiration unless touch-on-hit is disabled.
    ///
    /// An expired item is evicted and treated as a miss. On a miss the loader,
    /// if configured, is called without the lock held; a loaded value is
    /// stored with the default TTL and returned. If another caller stored the
    /// key while the loader ran, that item is returned instead.
    ///
    /// # Errors
    /// [`CacheError::Loader`] if the loader fails. Nothing is stored then.
    pub fn get(&self, key: &K) -> Result<Option<Item<K, V>>> {
        let lookup = {
            let mut store = self.shared.store.write();
            let now = self.shared.clock.now();
            store.get(key, now)
        };

        match lookup {
            Lookup::Hit(item) => return Ok(Some(item)),
            Lookup::Expired(item) => {
                self.fire_evictions(EvictionReason::Expired, slice::from_ref(&item))
            }
            Lookup::Miss => {}
        }

        let Some(loader) = &self.shared.loader else {
            return Ok(None);
        };
        match loader.load(key) {
            Ok(Some(value)) => Ok(Some(self.fill(key, value))),
            Ok(None) => Ok(None),
            Err(err) => {
                warn!(error = %err, "Loader failed");
                Err(CacheError::Loader(err))
            }
        }
    }

    // == Get Or Set ==
    /// Returns the live item for the key, or stores the given value.
    ///
    /// The boolean is true when the item was already present.
    pub fn get_or_set(&self, key: K, value: V, ttl: impl Into<Ttl>) -> (Item<K, V>, bool) {
        let ttl = ttl.into();
        let (expired, outcome) = {
            let mut store = self.shared.store.write();
            let now = self.shared.clock.now();
            let expired = match store.get(&key, now) {
                Lookup::Hit(item) => return (item, true),
                Lookup::Expired(item) => Some(item),
                Lookup::Miss => None,
            };
            (expired, store.set(key, value, ttl, now))
        };

        if let Some(item) = &expired {
            self.fire_evictions(EvictionReason::Expired, slice::from_ref(item));
        }
        (self.stored(outcome), false)
    }

    // == Get And Delete ==
    /// Removes and returns the live item for the key.
    pub fn get_and_delete(&self, key: &K) -> Option<Item<K, V>> {
        let lookup = {
            let mut store = self.shared.store.write();
            let now = self.shared.clock.now();
            store.take(key, now)
        };

        match lookup {
            Lookup::Hit(item) => {
                self.fire_evictions(EvictionReason::Deleted, slice::from_ref(&item));
                Some(item)
            }
            Lookup::Expired(item) => {
                self.fire_evictions(EvictionReason::Expired, slice::from_ref(&item));
                None
            }
            Lookup::Miss => None,
        }
    }

    // == Peek ==
    /// Returns the live item without refreshing it, loading, or counting a hit.
    pub fn peek(&self, key: &K) -> Option<Item<K, V>> {
        let store = self.shared.store.read();
        store.peek(key, self.shared.clock.now())
    }

    /// Checks whether a live item exists for the key.
    pub fn contains(&self, key: &K) -> bool {
        let store = self.shared.store.read();
        store.contains(key, self.shared.clock.now())
    }

    // == Touch ==
    /// Slides the expiration of a live item even if touch-on-hit is disabled.
    ///
    /// Returns false if there was no live item.
    pub fn touch(&self, key: &K) -> bool {
        let lookup = {
            let mut store = self.shared.store.write();
            let now = self.shared.clock.now();
            store.touch(key, now)
        };

        match lookup {
            Lookup::Hit(_) => true,
            Lookup::Expired(item) => {
                self.fire_evictions(EvictionReason::Expired, slice::from_ref(&item));
                false
            }
            Lookup::Miss => false,
        }
    }

    // == Delete ==
    /// Removes the item for the key. Absent keys are ignored.
    pub fn delete(&self, key: &K) {
        let removed = self.shared.store.write().remove(key);
        if let Some(item) = removed {
            self.fire_evictions(EvictionReason::Deleted, slice::from_ref(&item));
        }
    }

    // == Delete Expired ==
    /// Removes every expired item. Returns the number removed.
    pub fn delete_expired(&self) -> usize {
        let expired = {
            let mut store = self.shared.store.write();
            let now = self.shared.clock.now();
            store.delete_expired(now)
        };

        if !expired.is_empty() {
            debug!("Removed {} expired entries", expired.len());
        }
        self.fire_evictions(EvictionReason::Expired, &expired);
        expired.len()
    }

    // == Delete All ==
    /// Removes every item and fires the clear event once.
    ///
    /// No per-item eviction events are fired.
    pub fn delete_all(&self) {
        let cleared = self.shared.store.write().clear();
        info!(
            "Cache cleared ({}), dropped {} entries",
            EvictionReason::ClearedAll,
            cleared
        );
        self.shared.subscribers.fire_clear(cleared);
    }

    // == Accessors ==

    /// Returns the number of items, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.shared.store.read().len()
    }

    /// Returns true if the cache holds no items.
    pub fn is_empty(&self) -> bool {
        self.shared.store.read().is_empty()
    }

    /// Returns a snapshot of the live keys, next to expire first.
    ///
    /// Expired items not yet swept are skipped, as in [`Cache::items`], so
    /// this can be shorter than [`Cache::len`].
    pub fn keys(&self) -> Vec<K> {
        let store = self.shared.store.read();
        store.keys(self.shared.clock.now())
    }

    /// Returns a snapshot of the live items, next to expire first.
    pub fn items(&self) -> Vec<Item<K, V>> {
        let store = self.shared.store.read();
        store.items(self.shared.clock.now())
    }

    /// Returns a snapshot of the activity counters.
    pub fn metrics(&self) -> Metrics {
        self.shared.store.read().metrics()
    }

    /// Returns when the next item expires, or None if no item ever will.
    pub fn next_expiration(&self) -> Option<Instant> {
        self.shared.store.read().next_expiration()
    }

    /// Returns how long until the next item expires.
    pub(crate) fn until_next_expiration(&self) -> Option<Duration> {
        self.next_expiration()
            .map(|at| at.saturating_duration_since(self.shared.clock.now()))
    }

    // == Subscriptions ==

    /// Registers a handler called with every item stored by `set`.
    pub fn on_insertion<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Item<K, V>) + Send + Sync + 'static,
    {
        self.shared.subscribers.on_insertion(handler)
    }

    /// Registers a handler called with every evicted item.
    pub fn on_eviction<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(EvictionReason, &Item<K, V>) + Send + Sync + 'static,
    {
        self.shared.subscribers.on_eviction(handler)
    }

    /// Registers a handler called once per `delete_all`.
    pub fn on_clear<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.shared.subscribers.on_clear(handler)
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers.unsubscribe(id)
    }

    // == Sweeper ==

    /// Spawns the background sweeper on the current tokio runtime.
    ///
    /// Returns None if a sweeper is already running for this cache.
    ///
    /// The sweeper does not keep the cache alive: it exits on `stop` or when
    /// the last `Cache` handle is dropped.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        spawn_sweeper(self)
    }

    /// Asks the running sweeper to exit. Does nothing if none is running.
    pub fn stop(&self) {
        self.shared.sweeper.stop();
    }

    pub(crate) fn sweeper(&self) -> &SweeperControl {
        &self.shared.sweeper
    }

    pub(crate) fn downgrade(&self) -> WeakCache<K, V> {
        WeakCache {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Stores a loaded value unless a concurrent caller already did.
    ///
    /// Callers sharing one load all reach this point; only the first one
    /// stores, the rest get the item it stored.
    fn fill(&self, key: &K, value: V) -> Item<K, V> {
        let outcome = {
            let mut store = self.shared.store.write();
            let now = self.shared.clock.now();
            if let Some(item) = store.peek(key, now) {
                return item;
            }
            store.set(key.clone(), value, Ttl::Default, now)
        };
        self.stored(outcome)
    }

    /// Delivers the events of a completed set.
    fn stored(&self, outcome: SetOutcome<K, V>) -> Item<K, V> {
        if let Some(evicted) = &outcome.evicted {
            debug!("Capacity reached, evicted oldest entry");
            self.fire_evictions(EvictionReason::CapacityReached, slice::from_ref(evicted));
        }
        if outcome.is_head {
            self.shared.sweeper.wake();
        }
        self.shared.subscribers.fire_insertion(&outcome.item);
        outcome.item
    }

    fn fire_evictions(&self, reason: EvictionReason, items: &[Item<K, V>]) {
        self.shared.subscribers.fire_evictions(reason, items);
    }
}

// == Cache Builder ==
/// Configures and builds a [`Cache`].
pub struct CacheBuilder<K, V> {
    config: Config,
    loader: Option<Arc<dyn Loader<K, V>>>,
    clock: Arc<dyn Clock>,
    subscribers: Subscribers<K, V>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            config: Config::default(),
            loader: None,
            clock: Arc::new(SystemClock),
            subscribers: Subscribers::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Default TTL for `Ttl::Default`. Zero means items never expire.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Maximum number of items. Must be positive.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = Some(capacity);
        self
    }

    /// Stops `get` from sliding expirations.
    pub fn disable_touch_on_hit(mut self) -> Self {
        self.config.disable_touch_on_hit = true;
        self
    }

    /// Loader called on misses.
    pub fn loader(mut self, loader: impl Loader<K, V> + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Time source, mainly for tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers an insertion handler.
    pub fn on_insertion<F>(self, handler: F) -> Self
    where
        F: Fn(&Item<K, V>) + Send + Sync + 'static,
    {
        self.subscribers.on_insertion(handler);
        self
    }

    /// Registers an eviction handler.
    pub fn on_eviction<F>(self, handler: F) -> Self
    where
        F: Fn(EvictionReason, &Item<K, V>) + Send + Sync + 'static,
    {
        self.subscribers.on_eviction(handler);
        self
    }

    /// Registers a clear handler.
    pub fn on_clear<F>(self, handler: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.subscribers.on_clear(handler);
        self
    }

    /// Validates the configuration and builds the cache.
    ///
    /// # Errors
    /// [`CacheError::InvalidConfig`] if the capacity is zero.
    pub fn build(self) -> Result<Cache<K, V>> {
        self.config.validate()?;
        Ok(self.assemble())
    }

    fn assemble(self) -> Cache<K, V> {
        Cache {
            shared: Arc::new(Shared {
                store: RwLock::new(Store::new(&self.config)),
                subscribers: self.subscribers,
                loader: self.loader,
                clock: self.clock,
                sweeper: SweeperControl::new(),
            }),
        }
    }
}
