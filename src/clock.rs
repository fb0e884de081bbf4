//! Time sources for window accounting.
//!
//! Every timestamp in the rate limiting subsystem is an absolute number of
//! milliseconds since the Unix epoch. Reading time through [`Clock`] lets tests
//! step time with [`ManualClock`] instead of sleeping.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> u64;
}

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(duration_millis)
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can hand one clone to a
/// store and keep another to advance it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a window length to whole milliseconds.
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_epoch() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_micros(1_999)), 1);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);

        let clock = ManualClock::new(0);
        clock.advance(Duration::from_secs(u64::MAX));
        assert_eq!(clock.now_millis(), u64::MAX);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(1_000);
        let handle = clock.clone();

        handle.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 1_250);

        clock.set(5_000);
        assert_eq!(handle.now_millis(), 5_000);
    }
}
