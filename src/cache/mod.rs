//! Cache Module
//!
//! Provides in-memory caching with per-item TTL expiration and
//! capacity-bounded eviction of the item closest to expiry.

mod engine;
mod events;
mod item;
mod loader;
mod metrics;
mod queue;
mod store;


// Re-export public types
pub use engine::{Cache, CacheBuilder};
pub use events::{ClearHandler, EvictionHandler, EvictionReason, InsertionHandler, SubscriptionId};
pub use item::{Expiration, Item, Ttl};
pub use loader::{Loader, SuppressedLoader};
pub use metrics::Metrics;
pub(crate) use queue::ExpirationQueue;
pub(crate) use store::{Lookup, SetOutcome, Store};
