//! ttlcache - An in-memory key/value cache with per-item expiration
//!
//! Items expire after their TTL, optionally sliding on every read. A
//! capacity bound evicts the item closest to expiry, a loader can fill
//! misses, and a background sweeper removes expired items on time.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{Cache, CacheBuilder, EvictionReason, Item, Loader, Metrics, SubscriptionId, Ttl};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{CacheError, Result};
