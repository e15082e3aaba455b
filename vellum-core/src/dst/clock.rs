//! SimClock - Manually Driven Time
//!
//! `TigerStyle`: audit timestamps in simulated runs come from a counter the
//! test advances, never from the wall clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::constants::DST_TIME_ADVANCE_MS_MAX;

/// Milliseconds since the Unix epoch, moved forward only by `advance_ms`.
///
/// Clones observe the same instant.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    epoch_ms: Arc<AtomicU64>,
}

impl SimClock {
    /// A clock at the Unix epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock at `epoch_ms` milliseconds past the epoch.
    ///
    /// ```
    /// use vellum_core::dst::SimClock;
    ///
    /// let clock = SimClock::at_ms(1_500);
    /// clock.advance_ms(500);
    /// assert_eq!(clock.now().timestamp(), 2);
    /// ```
    #[must_use]
    pub fn at_ms(epoch_ms: u64) -> Self {
        Self {
            epoch_ms: Arc::new(AtomicU64::new(epoch_ms)),
        }
    }

    /// Current reading in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.epoch_ms.load(Ordering::SeqCst)
    }

    /// Current reading as a UTC instant.
    ///
    /// Readings beyond chrono's range saturate to the epoch.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        i64::try_from(self.now_ms())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Move time forward by `ms` and return the new reading.
    ///
    /// # Panics
    /// Panics if `ms` exceeds `DST_TIME_ADVANCE_MS_MAX`.
    pub fn advance_ms(&self, ms: u64) -> u64 {
        assert!(
            ms <= DST_TIME_ADVANCE_MS_MAX,
            "advance of {ms}ms exceeds DST_TIME_ADVANCE_MS_MAX"
        );
        let before = self.epoch_ms.fetch_add(ms, Ordering::SeqCst);
        before.saturating_add(ms)
    }
}
