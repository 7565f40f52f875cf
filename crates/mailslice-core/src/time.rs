//! Wall-clock abstraction for testability.
//!
//! Freshness checks ("was this range synced in the last six hours?") and sync
//! timestamps read the current time through a [`Clock`], so tests can pin
//! and advance it.
//!
//! # Example
//!
//! ```
//! use chrono::TimeDelta;
//! use mailslice_core::time::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//!
//! clock.advance(TimeDelta::hours(7));
//!
//! assert_eq!(clock.now() - start, TimeDelta::hours(7));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};

use crate::cache::far_past;

/// Abstraction over wall-clock time.
///
/// In production, use [`SystemClock`]. In tests, use [`MockClock`] to control
/// time deterministically.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the time `days` days before now.
    ///
    /// Negative counts are treated as zero; counts reaching past the
    /// earliest representable date return [`far_past`].
    fn days_ago(&self, days: i64) -> DateTime<Utc> {
        TimeDelta::try_days(days.max(0))
            .and_then(|delta| self.now().checked_sub_signed(delta))
            .map_or_else(far_past, |date| date.max(far_past()))
    }
}

/// System clock that uses real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A mock clock for testing time-dependent code.
///
/// The clock holds a millisecond timestamp that only moves when told to.
#[derive(Debug)]
pub struct MockClock {
    millis: AtomicI64,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    /// Creates a mock clock pinned to the real current time.
    #[must_use]
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Creates a mock clock pinned to the given time.
    #[must_use]
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(time.timestamp_millis()),
        }
    }

    /// Creates a shared mock clock.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Moves the clock forward (or backward, for a negative delta).
    pub fn advance(&self, delta: TimeDelta) {
        self.millis
            .fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }

    /// Pins the clock to the given time.
    pub fn set(&self, time: DateTime<Utc>) {
        self.millis.store(time.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}
