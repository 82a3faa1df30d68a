//! Wall-clock time sources.
//!
//! Every timestamp in the engine (record `updated_at`, cache expiry) comes from
//! a [`TimeSource`], so tests can drive time explicitly with [`ManualClock`].

use crate::Timestamp;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of "now" in milliseconds since the Unix epoch.
pub trait TimeSource: Debug + Send + Sync {
    fn now_ms(&self) -> Timestamp;
}

/// Shared handle to a time source.
pub type SharedClock = Arc<dyn TimeSource>;

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Wrap the system clock in a shared handle.
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl TimeSource for SystemClock {
    fn now_ms(&self) -> Timestamp {
        // Pre-epoch system time clamps to zero.
        chrono::Utc::now().timestamp_millis().max(0) as Timestamp
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start` milliseconds.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Create a shared manual clock, returning both the concrete handle (for
    /// advancing) and the trait object (for handing to components).
    pub fn shared(start: Timestamp) -> (Arc<ManualClock>, SharedClock) {
        let clock = Arc::new(ManualClock::new(start));
        let shared: SharedClock = clock.clone();
        (clock, shared)
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: Timestamp) {
        self.now.store(to, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Add a duration to a timestamp without overflowing.
pub fn add_duration(ts: Timestamp, by: Duration) -> Timestamp {
    ts.saturating_add(by.as_millis().min(u64::MAX as u128) as u64)
}
