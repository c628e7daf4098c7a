//! Clock Module
//!
//! Monotonic time source used for every expiration decision.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

// == Clock Trait ==
/// Source of "now" for the cache.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;
}

// == System Clock ==
/// Clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// == Manual Clock ==
/// Clock that only moves when told to. Useful for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Creates a manual clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}
