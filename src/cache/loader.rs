//! Loader Module
//!
//! Produces values for keys missing from the cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

// == Loader Trait ==
/// Called by `Cache::get` on a miss.
///
/// `Ok(Some(value))` stores the value under the key with the default TTL,
/// `Ok(None)` reports the key as not found, and an error is returned to the
/// caller of `get` unchanged. The loader runs without the cache lock held,
/// so it may use the cache itself.
pub trait Loader<K, V>: Send + Sync {
    /// Loads the value for `key`.
    fn load(&self, key: &K) -> anyhow::Result<Option<V>>;
}

impl<K, V, F> Loader<K, V> for F
where
    F: Fn(&K) -> anyhow::Result<Option<V>> + Send + Sync,
{
    fn load(&self, key: &K) -> anyhow::Result<Option<V>> {
        self(key)
    }
}

// == Suppressed Loader ==
/// Loader wrapper that lets concurrent misses on one key share a single
/// call to the wrapped loader.
///
/// The caller that starts the load gets the wrapped loader's result as is.
/// Callers that joined it get a copy of the value, or an error carrying the
/// same message.
pub struct SuppressedLoader<K, V, L> {
    inner: L,
    in_flight: Mutex<HashMap<K, Arc<Flight<V>>>>,
}

type SharedResult<V> = Result<Option<V>, String>;

/// One in-progress load.
struct Flight<V> {
    result: Mutex<Option<SharedResult<V>>>,
    done: Condvar,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, result: SharedResult<V>) {
        let mut slot = self.result.lock();
        if slot.is_none() {
            *slot = Some(result);
        }
        self.done.notify_all();
    }

    fn wait(&self) -> SharedResult<V> {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut slot);
        }
    }
}

/// Completes and retires a flight even if the wrapped loader panics.
struct FlightGuard<'a, K: Eq + Hash, V: Clone> {
    key: &'a K,
    flight: &'a Flight<V>,
    in_flight: &'a Mutex<HashMap<K, Arc<Flight<V>>>>,
}

impl<K: Eq + Hash, V: Clone> Drop for FlightGuard<'_, K, V> {
    fn drop(&mut self) {
        self.flight
            .complete(Err("loader did not complete".to_string()));
        self.in_flight.lock().remove(self.key);
    }
}

impl<K, V, L> SuppressedLoader<K, V, L>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Wraps a loader.
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V, L> Loader<K, V> for SuppressedLoader<K, V, L>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    L: Loader<K, V>,
{
    fn load(&self, key: &K) -> anyhow::Result<Option<V>> {
        let (flight, leader) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    in_flight.insert(key.clone(), Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if !leader {
            return flight.wait().map_err(anyhow::Error::msg);
        }

        let _guard = FlightGuard {
            key,
            flight: &flight,
            in_flight: &self.in_flight,
        };
        let result = self.inner.load(key);
        flight.complete(match &result {
            Ok(value) => Ok(value.clone()),
            Err(err) => Err(format!("{:#}", err)),
        });
        result
    }
}
