//! Cache Store Module
//!
//! Single-threaded cache engine combining the key lookup table with the
//! expiration queue. Locking and event delivery live in [`crate::Cache`].

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::cache::{ExpirationQueue, Item, Metrics, Ttl};
use crate::config::Config;

// == Operation Outcomes ==
/// Result of a `set`.
#[derive(Debug)]
pub struct SetOutcome<K, V> {
    /// Copy of the stored item
    pub item: Item<K, V>,
    /// Item evicted to make room, if capacity was reached
    pub evicted: Option<Item<K, V>>,
    /// True when the stored item is now the next one to expire
    pub is_head: bool,
}

/// Result of a lookup that may evict.
#[derive(Debug)]
pub enum Lookup<K, V> {
    /// Live item
    Hit(Item<K, V>),
    /// Item was present but expired; it has been removed
    Expired(Item<K, V>),
    /// No item for the key
    Miss,
}

// == Cache Store ==
/// Lookup table and expiration queue kept consistent with each other.
///
/// Every key in `map` points at exactly one occupied slot in `queue`, and
/// every queued item is reachable from `map`.
#[derive(Debug)]
pub struct Store<K, V> {
    /// Key to queue slot
    map: HashMap<K, usize>,
    /// Items ordered by expiration
    queue: ExpirationQueue<K, V>,
    /// Activity counters
    metrics: Metrics,
    /// TTL used by `Ttl::Default`, None = never expire
    default_ttl: Option<Duration>,
    /// Maximum number of entries, None = unbounded
    capacity: Option<usize>,
    /// Slide expiration on `get`
    touch_on_hit: bool,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    // == Constructor ==
    /// Creates an empty store. The config is expected to be validated.
    pub fn new(config: &Config) -> Self {
        Self {
            map: HashMap::new(),
            queue: ExpirationQueue::new(),
            metrics: Metrics::new(),
            default_ttl: (!config.default_ttl.is_zero()).then_some(config.default_ttl),
            capacity: config.capacity,
            touch_on_hit: !config.disable_touch_on_hit,
        }
    }

    /// Resolves a requested TTL to a concrete policy.
    pub fn resolve_ttl(&self, ttl: Ttl) -> Option<Duration> {
        match ttl {
            Ttl::Never => None,
            Ttl::After(ttl) if !ttl.is_zero() => Some(ttl),
            Ttl::After(_) | Ttl::Default => self.default_ttl,
        }
    }

    // == Set ==
    /// Stores a value, replacing any existing one for the key.
    ///
    /// A replaced item is unlinked and the new one linked at its expiration
    /// position. A new key arriving at capacity evicts exactly one item, the
    /// queue head, before it is linked.
    pub fn set(&mut self, key: K, value: V, ttl: Ttl, now: Instant) -> SetOutcome<K, V> {
        let ttl = self.resolve_ttl(ttl);

        let replaced = match self.map.get(&key) {
            Some(&idx) => self.queue.remove(idx).is_some(),
            None => false,
        };

        let evicted = match self.capacity {
            Some(capacity) if !replaced && self.map.len() >= capacity => self.evict_head(),
            _ => None,
        };

        let item = Item::new(key.clone(), value, ttl, now);
        let idx = self.queue.push(item.clone());
        self.map.insert(key, idx);

        if replaced {
            self.metrics.record_update();
        } else {
            self.metrics.record_insertion();
        }

        SetOutcome {
            item,
            evicted,
            is_head: self.queue.head_slot() == Some(idx),
        }
    }

    // == Get ==
    /// Looks a key up, sliding its expiration if touch-on-hit is enabled.
    ///
    /// Expired items are removed and reported as [`Lookup::Expired`].
    pub fn get(&mut self, key: &K, now: Instant) -> Lookup<K, V> {
        let lookup = self.lookup(key, now, self.touch_on_hit);
        match lookup {
            Lookup::Hit(_) => self.metrics.record_hit(),
            Lookup::Expired(_) | Lookup::Miss => self.metrics.record_miss(),
        }
        lookup
    }

    // == Touch ==
    /// Slides the expiration of a live item whatever the touch-on-hit setting.
    pub fn touch(&mut self, key: &K, now: Instant) -> Lookup<K, V> {
        self.lookup(key, now, true)
    }

    // == Take ==
    /// Removes and returns a live item.
    pub fn take(&mut self, key: &K, now: Instant) -> Lookup<K, V> {
        let Some(&idx) = self.map.get(key) else {
            return Lookup::Miss;
        };

        match self.queue.get(idx).map(|item| item.is_expired_at(now)) {
            Some(true) => self.evict(key, idx, Lookup::Expired),
            Some(false) => self.evict(key, idx, Lookup::Hit),
            None => Lookup::Miss,
        }
    }

    // == Peek ==
    /// Returns a copy of a live item without touching it.
    pub fn peek(&self, key: &K, now: Instant) -> Option<Item<K, V>> {
        self.map
            .get(key)
            .and_then(|&idx| self.queue.get(idx))
            .filter(|item| !item.is_expired_at(now))
            .cloned()
    }

    /// Checks whether a live item exists for the key.
    pub fn contains(&self, key: &K, now: Instant) -> bool {
        self.map
            .get(key)
            .and_then(|&idx| self.queue.get(idx))
            .is_some_and(|item| !item.is_expired_at(now))
    }

    // == Delete ==
    /// Removes an item whatever its expiration.
    pub fn remove(&mut self, key: &K) -> Option<Item<K, V>> {
        let idx = self.map.remove(key)?;
        let item = self.queue.remove(idx)?;
        self.metrics.record_evictions(1);
        Some(item)
    }

    // == Delete Expired ==
    /// Removes every item expired at `now`, walking from the queue head and
    /// stopping at the first live item.
    pub fn delete_expired(&mut self, now: Instant) -> Vec<Item<K, V>> {
        let mut expired = Vec::new();
        while let Some(item) = self.queue.pop_expired(now) {
            self.map.remove(item.key());
            expired.push(item);
        }
        self.metrics.record_evictions(expired.len());
        expired
    }

    // == Clear ==
    /// Drops every item. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        self.map.clear();
        self.queue.clear()
    }

    // == Accessors ==

    /// Returns the current number of items, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the keys of live items in expiration order.
    pub fn keys(&self, now: Instant) -> Vec<K> {
        self.queue
            .iter()
            .filter(|item| !item.is_expired_at(now))
            .map(|item| item.key().clone())
            .collect()
    }

    /// Returns copies of the live items in expiration order.
    pub fn items(&self, now: Instant) -> Vec<Item<K, V>> {
        self.queue
            .iter()
            .filter(|item| !item.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Returns when the next item expires, or None if nothing ever will.
    pub fn next_expiration(&self) -> Option<Instant> {
        self.queue.peek_head().and_then(|item| item.expires_at())
    }

    /// Returns current metrics.
    pub fn metrics(&self) -> Metrics {
        let mut metrics = self.metrics.clone();
        metrics.total_entries = self.queue.len();
        metrics
    }

    // == Internals ==

    fn lookup(&mut self, key: &K, now: Instant, refresh: bool) -> Lookup<K, V> {
        let Some(&idx) = self.map.get(key) else {
            return Lookup::Miss;
        };

        let state = self
            .queue
            .get(idx)
            .map(|item| (item.is_expired_at(now), item.ttl().is_some()));

        match state {
            Some((true, _)) => self.evict(key, idx, Lookup::Expired),
            Some((false, true)) if refresh => self
                .queue
                .update(idx, |item| {
                    item.refresh(now);
                    Lookup::Hit(item.clone())
                })
                .unwrap_or(Lookup::Miss),
            Some((false, _)) => self
                .queue
                .get(idx)
                .map_or(Lookup::Miss, |item| Lookup::Hit(item.clone())),
            None => Lookup::Miss,
        }
    }

    fn evict(
        &mut self,
        key: &K,
        idx: usize,
        wrap: fn(Item<K, V>) -> Lookup<K, V>,
    ) -> Lookup<K, V> {
        self.map.remove(key);
        match self.queue.remove(idx) {
            Some(item) => {
                self.metrics.record_evictions(1);
                wrap(item)
            }
            None => Lookup::Miss,
        }
    }

    fn evict_head(&mut self) -> Option<Item<K, V>> {
        let item = self.queue.pop_head()?;
        self.map.remove(item.key());
        self.metrics.record_evictions(1);
        Some(item)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl_ms: u64, capacity: Option<usize>) -> Store<String, String> {
        Store::new(&Config {
            default_ttl: Duration::from_millis(ttl_ms),
            capacity,
            disable_touch_on_hit: false,
        })
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn hit_value(lookup: Lookup<String, String>) -> Option<String> {
        match lookup {
            Lookup::Hit(item) => Some(item.into_value()),
            _ => None,
        }
    }

    #[test]
    fn test_store_new() {
        let store = store(0, None);
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert!(store.next_expiration().is_none());
    }

    #[test]
    fn test_store_set_and_get() {
        let now = Instant::now();
        let mut store = store(0, None);

        let outcome = store.set("key1".to_string(), "value1".to_string(), Ttl::Default, now);
        assert!(outcome.evicted.is_none());
        assert!(outcome.is_head);

        assert_eq!(hit_value(store.get(&"key1".to_string(), now)), Some("value1".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store = store(0, None);
        assert!(matches!(store.get(&"nope".to_string(), Instant::now()), Lookup::Miss));
    }

    #[test]
    fn test_resolve_ttl() {
        let with_default = store(500, None);
        assert_eq!(with_default.resolve_ttl(Ttl::Default), Some(ms(500)));
        assert_eq!(with_default.resolve_ttl(Ttl::After(Duration::ZERO)), Some(ms(500)));
        assert_eq!(with_default.resolve_ttl(Ttl::After(ms(20))), Some(ms(20)));
        assert_eq!(with_default.resolve_ttl(Ttl::Never), None);

        let no_default = store(0, None);
        assert_eq!(no_default.resolve_ttl(Ttl::Default), None);
    }

    #[test]
    fn test_store_overwrite() {
        let now = Instant::now();
        let mut store = store(0, None);

        store.set("key1".to_string(), "value1".to_string(), Ttl::Default, now);
        store.set("key1".to_string(), "value2".to_string(), Ttl::Default, now);

        assert_eq!(hit_value(store.get(&"key1".to_string(), now)), Some("value2".to_string()));
        assert_eq!(store.len(), 1);

        let metrics = store.metrics();
        assert_eq!(metrics.insertions, 1);
        assert_eq!(metrics.updates, 1);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let now = Instant::now();
        let mut store = store(0, Some(2));

        store.set("a".to_string(), "1".to_string(), Ttl::Default, now);
        store.set("b".to_string(), "2".to_string(), Ttl::Default, now);
        let outcome = store.set("a".to_string(), "3".to_string(), Ttl::Default, now);

        assert!(outcome.evicted.is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let now = Instant::now();
        let mut store = store(0, None);

        store.set("key1".to_string(), "value1".to_string(), Ttl::After(ms(100)), now);

        assert!(matches!(store.get(&"key1".to_string(), now + ms(99)), Lookup::Hit(_)));
        // The hit above slid the expiration to 199ms
        assert!(matches!(
            store.get(&"key1".to_string(), now + ms(199)),
            Lookup::Expired(_)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_touch_on_hit_slides_expiration() {
        let now = Instant::now();
        let mut store = store(100, None);

        store.set("k".to_string(), "v".to_string(), Ttl::Default, now);
        store.get(&"k".to_string(), now + ms(60));

        assert_eq!(store.next_expiration(), Some(now + ms(160)));
        assert!(store.contains(&"k".to_string(), now + ms(150)));
        assert!(!store.contains(&"k".to_string(), now + ms(160)));
    }

    #[test]
    fn test_disabled_touch_on_hit_keeps_expiration() {
        let now = Instant::now();
        let mut store: Store<String, String> = Store::new(&Config {
            default_ttl: ms(100),
            capacity: None,
            disable_touch_on_hit: true,
        });

        store.set("k".to_string(), "v".to_string(), Ttl::Default, now);
        store.get(&"k".to_string(), now + ms(60));
        assert_eq!(store.next_expiration(), Some(now + ms(100)));

        // Explicit touch still works
        store.touch(&"k".to_string(), now + ms(60));
        assert_eq!(store.next_expiration(), Some(now + ms(160)));
    }

    #[test]
    fn test_store_capacity_eviction() {
        let now = Instant::now();
        let mut store = store(0, Some(3));

        store.set("key1".to_string(), "value1".to_string(), Ttl::Default, now);
        store.set("key2".to_string(), "value2".to_string(), Ttl::Default, now);
        store.set("key3".to_string(), "value3".to_string(), Ttl::Default, now);

        // Cache is full, adding key4 should evict key1 (head)
        let outcome = store.set("key4".to_string(), "value4".to_string(), Ttl::Default, now);
        assert_eq!(outcome.evicted.map(|item| item.key().clone()), Some("key1".to_string()));

        assert_eq!(store.len(), 3);
        assert!(!store.contains(&"key1".to_string(), now));
        assert_eq!(store.keys(now), vec!["key2", "key3", "key4"]);
    }

    #[test]
    fn test_store_touch_protects_from_capacity_eviction() {
        let now = Instant::now();
        let mut store = store(1000, Some(3));

        store.set("key1".to_string(), "value1".to_string(), Ttl::Default, now);
        store.set("key2".to_string(), "value2".to_string(), Ttl::Default, now);
        store.set("key3".to_string(), "value3".to_string(), Ttl::Default, now);

        // Access key1 so it moves to the tail
        store.get(&"key1".to_string(), now + ms(1));

        let outcome = store.set("key4".to_string(), "value4".to_string(), Ttl::Default, now + ms(2));
        assert_eq!(outcome.evicted.map(|item| item.key().clone()), Some("key2".to_string()));
        assert!(store.contains(&"key1".to_string(), now + ms(2)));
    }

    #[test]
    fn test_never_expiring_items_evicted_last() {
        let now = Instant::now();
        let mut store = store(0, Some(2));

        store.set("forever".to_string(), "1".to_string(), Ttl::Never, now);
        store.set("short".to_string(), "2".to_string(), Ttl::After(ms(1000)), now);

        let outcome = store.set("new".to_string(), "3".to_string(), Ttl::After(ms(1000)), now);
        assert_eq!(outcome.evicted.map(|item| item.key().clone()), Some("short".to_string()));

        // With only never-expiring items left, the oldest one goes
        let mut forever_only: Store<String, String> = Store::new(&Config {
            capacity: Some(2),
            ..Config::default()
        });
        forever_only.set("n1".to_string(), "1".to_string(), Ttl::Never, now);
        forever_only.set("n2".to_string(), "2".to_string(), Ttl::Never, now);
        let outcome = forever_only.set("n3".to_string(), "3".to_string(), Ttl::Never, now);
        assert_eq!(outcome.evicted.map(|item| item.key().clone()), Some("n1".to_string()));
    }

    #[test]
    fn test_store_delete() {
        let now = Instant::now();
        let mut store = store(0, None);

        store.set("key1".to_string(), "value1".to_string(), Ttl::Default, now);
        let removed = store.remove(&"key1".to_string());

        assert_eq!(removed.map(Item::into_value), Some("value1".to_string()));
        assert!(store.is_empty());
        assert!(store.remove(&"key1".to_string()).is_none());
    }

    #[test]
    fn test_take() {
        let now = Instant::now();
        let mut store = store(0, None);

        store.set("live".to_string(), "1".to_string(), Ttl::Default, now);
        store.set("stale".to_string(), "2".to_string(), Ttl::After(ms(10)), now);

        assert_eq!(hit_value(store.take(&"live".to_string(), now + ms(10))), Some("1".to_string()));
        assert!(matches!(
            store.take(&"stale".to_string(), now + ms(10)),
            Lookup::Expired(_)
        ));
        assert!(matches!(store.take(&"live".to_string(), now), Lookup::Miss));
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_delete_expired() {
        let now = Instant::now();
        let mut store = store(0, None);

        store.set("key1".to_string(), "value1".to_string(), Ttl::After(ms(100)), now);
        store.set("key2".to_string(), "value2".to_string(), Ttl::After(ms(10_000)), now);
        store.set("key3".to_string(), "value3".to_string(), Ttl::Never, now);

        let expired = store.delete_expired(now + ms(100));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key(), "key1");
        assert_eq!(store.len(), 2);

        // Idempotent
        assert!(store.delete_expired(now + ms(100)).is_empty());
        assert_eq!(store.metrics().evictions, 1);
    }

    #[test]
    fn test_peek_does_not_touch_or_count() {
        let now = Instant::now();
        let mut store = store(100, None);

        store.set("k".to_string(), "v".to_string(), Ttl::Default, now);
        assert!(store.peek(&"k".to_string(), now + ms(60)).is_some());
        assert_eq!(store.next_expiration(), Some(now + ms(100)));
        assert!(store.peek(&"k".to_string(), now + ms(100)).is_none());

        // The expired item is still there until swept
        assert_eq!(store.len(), 1);
        let metrics = store.metrics();
        assert_eq!(metrics.hits + metrics.misses, 0);
    }

    #[test]
    fn test_items_skip_expired() {
        let now = Instant::now();
        let mut store = store(0, None);

        store.set("a".to_string(), "1".to_string(), Ttl::After(ms(10)), now);
        store.set("b".to_string(), "2".to_string(), Ttl::Never, now);

        let items = store.items(now + ms(10));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key(), "b");
        assert_eq!(store.keys(now + ms(10)), vec!["b"]);

        // Both are still stored until swept
        assert_eq!(store.keys(now), vec!["a", "b"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_store_clear() {
        let now = Instant::now();
        let mut store = store(0, None);

        store.set("a".to_string(), "1".to_string(), Ttl::Default, now);
        store.set("b".to_string(), "2".to_string(), Ttl::Default, now);

        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
        assert!(store.keys(now).is_empty());
    }

    #[test]
    fn test_store_metrics() {
        let now = Instant::now();
        let mut store = store(0, None);

        store.set("key1".to_string(), "value1".to_string(), Ttl::Default, now);
        store.get(&"key1".to_string(), now); // hit
        store.get(&"nonexistent".to_string(), now); // miss

        let metrics = store.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.insertions, 1);
        assert_eq!(metrics.total_entries, 1);
    }
}
