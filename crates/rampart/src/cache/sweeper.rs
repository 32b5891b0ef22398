// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::TtlCache;

/// Interval between background sweeps when none is configured.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Handle to the background task started by [`TtlCache::start_sweeper`].
///
/// The task stops when [`stop`][Self::stop] is called, when the handle is dropped, or
/// when every clone of the cache has been dropped.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the background sweep.
    ///
    /// An in-progress sweep is not interrupted; the task exits before the next one starts.
    pub fn stop(self) {
        self.task.abort();
    }

    /// Returns `true` while the background task is still scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts a Tokio task that removes expired entries every `interval`.
    ///
    /// The sweep runs on the Tokio timer independently of request handling and only
    /// removes entries that are already logically expired, so it is safe to race with
    /// `get`, `set` and `delete`. The task holds a weak reference to the cache.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use = "dropping the handle stops the sweeper"]
    pub fn start_sweeper(&self, interval: Duration) -> SweeperHandle {
        let inner = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.cleanup();
            }
        });

        SweeperHandle { task }
    }
}
