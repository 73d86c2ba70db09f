//! Monotonic timing utilities
//!
//! Packet timestamps, RTT math and keepalive scheduling all work in
//! microseconds against a monotonic clock.

use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

/// Monotonic timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(Instant);

impl Timestamp {
    #[inline]
    pub fn now() -> Self {
        Timestamp(Instant::now())
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        self.0.duration_since(earlier.0)
    }

    /// Microseconds elapsed since a reference timestamp
    pub fn micros_since(&self, reference: Timestamp) -> u64 {
        self.0
            .duration_since(reference.0)
            .as_micros()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 + duration)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, other: Timestamp) -> Duration {
        self.0.duration_since(other.0)
    }
}

/// Timer for periodic work (keepalives, optimizer ticks)
pub struct Timer {
    interval: Duration,
    last_fire: Timestamp,
}

impl Timer {
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Timestamp::now(),
        }
    }

    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    pub fn reset(&mut self) {
        self.last_fire = Timestamp::now();
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }
}
