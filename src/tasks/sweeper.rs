//! Expiration Sweeper Task
//!
//! Background task that removes expired entries as they fall due.

use std::future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::Cache;

// == Sweeper Control ==
/// Start/stop state shared between a cache and its sweeper.
#[derive(Debug, Default)]
pub(crate) struct SweeperControl {
    run: Mutex<Option<Arc<RunSignal>>>,
}

/// Signals for one sweeper run. A restarted sweeper gets fresh signals.
#[derive(Debug, Default)]
struct RunSignal {
    stopped: AtomicBool,
    stop: Notify,
    wake: Notify,
}

impl Drop for SweeperControl {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SweeperControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new run. Returns None if one is already active.
    fn begin(&self) -> Option<Arc<RunSignal>> {
        let mut run = self.run.lock();
        if run.is_some() {
            return None;
        }
        let signal = Arc::new(RunSignal::default());
        *run = Some(Arc::clone(&signal));
        Some(signal)
    }

    /// Makes the running sweeper recompute its deadline.
    pub fn wake(&self) {
        if let Some(signal) = self.run.lock().as_ref() {
            signal.wake.notify_one();
        }
    }

    /// Asks the running sweeper to exit. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(signal) = self.run.lock().take() {
            signal.stopped.store(true, Ordering::SeqCst);
            signal.stop.notify_one();
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.run.lock().is_some()
    }
}

// == Spawn ==
/// Spawns the sweeper for `cache` on the current tokio runtime.
///
/// The task sleeps until the head of the expiration queue is due, runs
/// `delete_expired`, and repeats. With nothing due it waits until woken.
/// A set that becomes the new head wakes it early. `Cache::stop`, or
/// dropping the last `Cache` handle, ends it; a pending stop always wins
/// over a due deadline.
///
/// # Returns
/// The task's JoinHandle, or None if a sweeper is already running.
pub(crate) fn spawn_sweeper<K, V>(cache: &Cache<K, V>) -> Option<JoinHandle<()>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let Some(signal) = cache.sweeper().begin() else {
        warn!("Sweeper already running, ignoring start");
        return None;
    };

    let weak = cache.downgrade();

    Some(tokio::spawn(async move {
        info!("Starting expiration sweeper");

        while !signal.stopped.load(Ordering::SeqCst) {
            let Some(due) = weak.upgrade().map(|cache| cache.until_next_expiration()) else {
                break;
            };
            let sleep = async {
                match due {
                    Some(wait) => tokio::time::sleep(wait).await,
                    None => future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = signal.stop.notified() => break,
                _ = signal.wake.notified() => {
                    debug!("Sweeper woken early, recomputing deadline");
                    continue;
                }
                _ = sleep => {}
            }

            let Some(cache) = weak.upgrade() else {
                break;
            };
            let removed = cache.delete_expired();
            if removed > 0 {
                debug!("Sweeper removed {} expired entries", removed);
            }
        }

        info!("Expiration sweeper stopped");
    }))
}
