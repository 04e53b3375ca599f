//! Presentation clock shared by the audio and video outputs
//!
//! Audio is the timing master: the audio callback calls `set` with the
//! timestamp of the audio it just handed to the device. Video is the slave:
//! it reads `get` to decide whether the next picture is due.
//!
//! The clock is logically an (anchor instant, offset) pair with
//! `presentation_time(now) = now - anchor + offset`. Both halves collapse into
//! one signed drift relative to a fixed monotonic epoch, so a single atomic
//! holds the whole state: readers never see a torn pair and never block the
//! writer.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic, settable presentation clock.
#[derive(Debug)]
pub struct SyncClock {
    /// Fixed reference point; all instants are measured from here
    epoch: Instant,

    /// Presentation time minus elapsed-since-epoch, in nanoseconds
    drift_ns: AtomicI64,

    /// Whether `set` has ever been called
    was_set: AtomicBool,
}

impl SyncClock {
    /// Create a clock reading zero now and running at wall-clock rate.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            drift_ns: AtomicI64::new(0),
            was_set: AtomicBool::new(false),
        }
    }

    /// Current presentation time.
    ///
    /// Negative presentation times read as zero.
    pub fn get(&self) -> Duration {
        let nanos = self.get_nanos();
        if nanos <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }

    /// Current presentation time in signed nanoseconds.
    pub fn get_nanos(&self) -> i64 {
        self.elapsed_nanos()
            .saturating_add(self.drift_ns.load(Ordering::Acquire))
    }

    /// Re-anchor so that `get()` returns `presentation` right now.
    pub fn set(&self, presentation: Duration) {
        let target = i64::try_from(presentation.as_nanos()).unwrap_or(i64::MAX);
        self.set_nanos(target);
    }

    /// Re-anchor to a signed nanosecond presentation time.
    pub fn set_nanos(&self, presentation_ns: i64) {
        let drift = presentation_ns.saturating_sub(self.elapsed_nanos());
        self.drift_ns.store(drift, Ordering::Release);
        self.was_set.store(true, Ordering::Release);
    }

    /// True once the timing master has set the clock at least once.
    pub fn is_set(&self) -> bool {
        self.was_set.load(Ordering::Acquire)
    }

    fn elapsed_nanos(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

impl Default for SyncClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clock_starts_near_zero() {
        let clock = SyncClock::new();
        assert!(clock.get() < Duration::from_millis(50));
        assert!(!clock.is_set());
    }

    #[test]
    fn test_set_then_get() {
        let clock = SyncClock::new();
        clock.set(Duration::from_secs(12));

        let now = clock.get();
        assert!(now >= Duration::from_secs(12));
        assert!(now < Duration::from_secs(12) + Duration::from_millis(50));
        assert!(clock.is_set());
    }

    #[test]
    fn test_set_backwards() {
        let clock = SyncClock::new();
        clock.set(Duration::from_secs(30));
        clock.set(Duration::from_millis(100));

        assert!(clock.get() < Duration::from_secs(1));
    }

    #[test]
    fn test_negative_saturates_to_zero() {
        let clock = SyncClock::new();
        clock.set_nanos(-5_000_000_000);

        assert_eq!(clock.get(), Duration::ZERO);
        assert!(clock.get_nanos() < 0);
    }
}
