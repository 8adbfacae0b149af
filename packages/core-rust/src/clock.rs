//! Wall-clock abstraction used for TTL bookkeeping.
//!
//! Stores never call `SystemTime::now()` directly; they ask a
//! [`ClockSource`]. Tests swap in a [`ManualClock`] and advance it to expire
//! entries without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Abstraction over the system clock for dependency injection.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    // Millisecond timestamps fit comfortably in i64 until the year 292 million.
    #[allow(clippy::cast_possible_truncation)]
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `millis`.
    #[must_use]
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Moves the clock forward by `by`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// Jumps the clock to `millis`.
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Absolute expiry (millis since epoch) for a TTL starting at `now`.
///
/// A zero TTL means "never expires" and yields `None`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn expiry_from(now: i64, ttl: Duration) -> Option<i64> {
    if ttl.is_zero() {
        None
    } else {
        Some(now.saturating_add(ttl.as_millis() as i64))
    }
}
