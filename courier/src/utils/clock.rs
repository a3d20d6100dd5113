//! Injectable time source.

use super::timestamps::{now_utc, Timestamp};
use parking_lot::RwLock;
use std::fmt::Debug;
use std::time::Duration;

/// A source of the current time.
///
/// Stages, the exception observer and the deferred processor read time through
/// this trait so that tests can drive the clock explicitly.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current UTC time.
    fn now(&self) -> Timestamp;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<Timestamp>,
}

impl ManualClock {
    /// Creates a manual clock starting at the given instant.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Creates a manual clock starting at the current wall-clock time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(now_utc())
    }

    /// Sets the current time.
    pub fn set(&self, now: Timestamp) {
        *self.now.write() = now;
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now = super::timestamps::add_window(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.read()
    }
}
