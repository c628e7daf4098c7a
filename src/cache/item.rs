//! Cache Item Module
//!
//! Defines individual cache items, their TTL policy and expiration time.

use std::time::{Duration, Instant};

// == TTL Policy ==
/// TTL requested when storing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the cache's configured default TTL
    #[default]
    Default,
    /// Never expire; the item is only removed explicitly or by capacity pressure
    Never,
    /// Expire this long after the last set or refresh.
    /// A zero duration behaves like [`Ttl::Default`].
    After(Duration),
}

impl From<Duration> for Ttl {
    fn from(ttl: Duration) -> Self {
        Ttl::After(ttl)
    }
}

// == Expiration ==
/// Absolute expiration of an item.
///
/// `Never` orders after every instant, which keeps never-expiring items at
/// the tail of the expiration queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expiration {
    /// Expires at this instant
    At(Instant),
    /// Never expires
    Never,
}

impl Expiration {
    /// Computes the expiration of an item (re)set at `now`.
    ///
    /// A TTL too large to represent as an instant never expires.
    pub fn from_ttl(now: Instant, ttl: Option<Duration>) -> Self {
        ttl.and_then(|ttl| now.checked_add(ttl))
            .map_or(Expiration::Never, Expiration::At)
    }

    /// Boundary condition: an item is expired once `now >= expires_at`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self {
            Expiration::At(at) => now >= *at,
            Expiration::Never => false,
        }
    }

    /// Returns the expiration instant, or None for `Never`.
    pub fn instant(&self) -> Option<Instant> {
        match self {
            Expiration::At(at) => Some(*at),
            Expiration::Never => None,
        }
    }
}

// == Cache Item ==
/// A single cache entry.
///
/// Items handed out by the cache are copies; changing them has no effect on
/// the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<K, V> {
    key: K,
    value: V,
    ttl: Option<Duration>,
    expires_at: Expiration,
}

impl<K, V> Item<K, V> {
    pub(crate) fn new(key: K, value: V, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            key,
            value,
            ttl,
            expires_at: Expiration::from_ttl(now, ttl),
        }
    }

    /// Returns the item's key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the item's value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the item, returning its value.
    pub fn into_value(self) -> V {
        self.value
    }

    /// Returns the TTL the item was stored with, or None if it never expires.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Returns the item's current expiration.
    pub fn expiration(&self) -> Expiration {
        self.expires_at
    }

    /// Returns the expiration instant, or None if the item never expires.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at.instant()
    }

    /// Checks whether the item is expired at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_expired_at(now)
    }

    /// Returns the remaining time to live at `now`.
    ///
    /// # Returns
    /// - `Some(Duration::ZERO)` if the item has expired
    /// - `Some(remaining)` if the item has a TTL and hasn't expired
    /// - `None` if the item never expires
    pub fn ttl_remaining_at(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .instant()
            .map(|at| at.saturating_duration_since(now))
    }

    // == Mutation (cache-internal) ==

    /// Slides the expiration to `now + ttl`. Returns false for never-expiring items.
    pub(crate) fn refresh(&mut self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => {
                self.expires_at = Expiration::from_ttl(now, Some(ttl));
                true
            }
            None => false,
        }
    }
}
