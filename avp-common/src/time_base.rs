//! Stream time base
//!
//! A rational number giving the duration of one timestamp tick in seconds.
//! Fixed per stream when the source is opened; used to bring packet and frame
//! timestamps into the clock's unit.

use crate::{Error, Result};
use std::fmt;
use std::time::Duration;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Seconds per tick as `num / den`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBase {
    num: u32,
    den: u32,
}

impl TimeBase {
    /// One tick per millisecond.
    pub const MILLISECONDS: TimeBase = TimeBase { num: 1, den: 1000 };

    /// Create a time base of `num / den` seconds per tick.
    ///
    /// # Errors
    /// Either part is zero.
    pub fn new(num: u32, den: u32) -> Result<Self> {
        if num == 0 || den == 0 {
            return Err(Error::InvalidInput(format!(
                "time base {}/{} must have non-zero numerator and denominator",
                num, den
            )));
        }
        Ok(Self { num, den })
    }

    /// Time base with one tick per sample (or frame) at `rate` Hz.
    pub fn from_rate(rate: u32) -> Result<Self> {
        Self::new(1, rate)
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn den(&self) -> u32 {
        self.den
    }

    /// Convert a timestamp to signed nanoseconds.
    pub fn ticks_to_nanos(&self, ticks: i64) -> i128 {
        ticks as i128 * self.num as i128 * NANOS_PER_SEC / self.den as i128
    }

    /// Convert a timestamp to a duration, saturating negative values at zero.
    pub fn ticks_to_duration(&self, ticks: i64) -> Duration {
        let nanos = self.ticks_to_nanos(ticks);
        if nanos <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(nanos.min(u64::MAX as i128) as u64)
        }
    }

    /// Convert a duration to the nearest lower tick.
    pub fn duration_to_ticks(&self, duration: Duration) -> i64 {
        let ticks = duration.as_nanos() as i128 * self.den as i128
            / (self.num as i128 * NANOS_PER_SEC);
        ticks.min(i64::MAX as i128) as i64
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
