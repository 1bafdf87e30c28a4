//! Time utilities for the bonding engine
//!
//! All timers take the current instant as an argument instead of reading the
//! clock themselves, so the worker samples the clock once per loop iteration
//! and tests can drive timers with synthetic instants.

use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

/// Monotonic timestamp
///
/// Keepalives carry a microsecond offset from the engine's reference
/// timestamp; the echo lets the path measure round-trip time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(Instant);

impl Timestamp {
    /// Get the current timestamp
    #[inline]
    pub fn now() -> Self {
        Timestamp(Instant::now())
    }

    /// Create a timestamp from a base instant
    #[inline]
    pub fn from_instant(instant: Instant) -> Self {
        Timestamp(instant)
    }

    /// Microseconds elapsed since the reference timestamp (saturating)
    pub fn as_micros_since(&self, reference: Timestamp) -> u64 {
        self.0
            .saturating_duration_since(reference.0)
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
        self.0.saturating_duration_since(other.0)
    }
}

/// Periodic timer
///
/// Used for keepalive transmission.
#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    next_fire: Instant,
}

impl Timer {
    /// Create a timer whose first expiry is one interval after `now`
    pub fn new(interval: Duration, now: Instant) -> Self {
        Timer {
            interval,
            next_fire: now + interval,
        }
    }

    /// Check if the timer has expired
    pub fn expired(&self, now: Instant) -> bool {
        now >= self.next_fire
    }

    /// Restart the interval from `now`
    pub fn reset(&mut self, now: Instant) {
        self.next_fire = now + self.interval;
    }

    /// Get time until next expiration
    pub fn time_until_expiration(&self, now: Instant) -> Duration {
        self.next_fire.saturating_duration_since(now)
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self, now: Instant) -> bool {
        if self.expired(now) {
            self.reset(now);
            true
        } else {
            false
        }
    }
}

/// Single-shot deadline
///
/// Fires at most once. Bounds the registration handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline armed to fire `after` from `now`
    pub fn after(now: Instant, after: Duration) -> Self {
        Deadline(Some(now + after))
    }

    pub fn is_armed(&self) -> bool {
        self.0.is_some()
    }

    /// Time left before the deadline, `None` when disarmed
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(now))
    }

    /// Fire the deadline if it has passed, disarming it
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.0 {
            Some(at) if now >= at => {
                self.0 = None;
                true
            }
            _ => false,
        }
    }
}
