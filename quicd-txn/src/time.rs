//! Monotonic time for timers owned by transactions.
//!
//! Transactions never read the wall clock directly. They ask a [`Clock`] for
//! the current [`Instant`] and report their next deadline so the owner can
//! arm a single timer per connection.

#![forbid(unsafe_code)]

use std::cell::Cell;
use std::time::Duration;

/// Point in time, in nanoseconds since an arbitrary epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant {
    nanos: u64,
}

impl Instant {
    pub const ZERO: Instant = Instant { nanos: 0 };

    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis.saturating_mul(1_000_000),
        }
    }

    pub fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Returns None if `other` is later than `self`.
    pub fn duration_since(&self, other: Instant) -> Option<Duration> {
        self.nanos
            .checked_sub(other.nanos)
            .map(Duration::from_nanos)
    }

    /// Like `duration_since`, clamped to zero.
    pub fn saturating_duration_since(&self, other: Instant) -> Duration {
        self.duration_since(other).unwrap_or(Duration::ZERO)
    }

    pub fn checked_add(&self, duration: Duration) -> Option<Instant> {
        let nanos = u64::try_from(duration.as_nanos()).ok()?;
        self.nanos.checked_add(nanos).map(Instant::from_nanos)
    }

    pub fn saturating_add(&self, duration: Duration) -> Instant {
        self.checked_add(duration)
            .unwrap_or(Instant { nanos: u64::MAX })
    }
}

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Clock backed by `std::time::Instant`, anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }

    /// Translate a crate instant back to a std instant on this clock's timeline.
    pub fn to_std(&self, instant: Instant) -> std::time::Instant {
        self.origin + Duration::from_nanos(instant.as_nanos())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        let elapsed = self.origin.elapsed().as_nanos();
        Instant::from_nanos(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}

/// Clock advanced explicitly. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl ManualClock {
    pub fn new(start: Instant) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by));
    }

    pub fn set(&self, instant: Instant) {
        self.now.set(instant);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_arithmetic() {
        let a = Instant::from_millis(5);
        let b = a.checked_add(Duration::from_millis(10)).unwrap();
        assert_eq!(b.duration_since(a), Some(Duration::from_millis(10)));
        assert_eq!(a.duration_since(b), None);
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(Instant::ZERO);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), Instant::from_millis(250));
    }

    #[test]
    fn test_saturating_add_clamps() {
        let late = Instant::from_nanos(u64::MAX - 1);
        assert_eq!(late.saturating_add(Duration::from_secs(1)).as_nanos(), u64::MAX);
    }
}
