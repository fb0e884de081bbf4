//! In-process window store.
//!
//! Holds one [`WindowRecord`] per key. Records live in a sharded map, so an
//! increment only locks the shard that owns its key and concurrent increments
//! for the same key are serialized by that shard lock.
//!
//! The store is process-local: several instances of the service each keep
//! their own counts, which under-enforces the limit across a fleet.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::{duration_millis, Clock, SystemClock};

/// Hit count for one key in its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowRecord {
    pub count: u64,
    /// Epoch milliseconds at which the window expires
    pub reset_at: u64,
}

impl WindowRecord {
    fn fresh(now: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            reset_at: now.saturating_add(window_ms),
        }
    }

    /// A window has expired once the clock is strictly past `reset_at`.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.reset_at
    }
}

/// Shared handle to the window store. Cloning is cheap and every clone sees
/// the same records.
#[derive(Clone, Debug)]
pub struct WindowStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    records: DashMap<String, WindowRecord>,
    clock: Arc<dyn Clock>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.get_mut().take() {
            handle.abort();
        }
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                records: DashMap::new(),
                clock,
                cleanup: Mutex::new(None),
            }),
        }
    }

    pub fn now_millis(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    /// Current record for `key`, or a zero-count record resetting now.
    pub fn get(&self, key: &str) -> WindowRecord {
        let now = self.now_millis();
        self.inner
            .records
            .get(key)
            .map(|record| *record)
            .unwrap_or(WindowRecord {
                count: 0,
                reset_at: now,
            })
    }

    /// Count one hit for `key` and return the new count.
    pub fn increment(&self, key: &str, window: Duration) -> u64 {
        self.hit(key, window).count
    }

    /// Count one hit for `key` and return the record as it stands right after
    /// this hit, so callers never observe another request's reset.
    pub fn hit(&self, key: &str, window: Duration) -> WindowRecord {
        let now = self.now_millis();
        let window_ms = duration_millis(window);

        match self.inner.records.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_expired(now) {
                    *record = WindowRecord::fresh(now, window_ms);
                } else {
                    record.count = record.count.saturating_add(1);
                }
                *record
            }
            Entry::Vacant(vacant) => *vacant.insert(WindowRecord::fresh(now, window_ms)),
        }
    }

    /// Forget `key` entirely. Returns whether a record existed.
    pub fn reset(&self, key: &str) -> bool {
        self.inner.records.remove(key).is_some()
    }

    /// Drop every expired record and return how many were removed.
    ///
    /// Shards are locked one at a time, so increments on other shards keep
    /// flowing while a pass is in progress.
    pub fn cleanup(&self) -> usize {
        let now = self.now_millis();
        let mut removed = 0;
        self.inner.records.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// Run [`cleanup`](Self::cleanup) every `every` on the tokio runtime until
    /// [`stop_cleanup`](Self::stop_cleanup) is called or the last handle to the
    /// store is dropped. Starting again replaces the running task.
    pub fn start_cleanup(&self, every: Duration) {
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = WindowStore { inner }.cleanup();
                debug!(
                    target: "api_gate::store",
                    removed = removed,
                    "Cleaned up expired rate limit windows"
                );
            }
        });

        if let Some(previous) = self.inner.cleanup.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_cleanup(&self) {
        if let Some(handle) = self.inner.cleanup.lock().take() {
            handle.abort();
        }
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.inner
            .cleanup
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
