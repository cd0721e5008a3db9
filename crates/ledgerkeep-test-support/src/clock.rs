//! A `Clock` tests can move by hand.

use std::sync::Mutex;

use chrono::{DateTime, TimeDelta, Utc};
use ledgerkeep_core::clock::Clock;

/// Clock that stands still until a test advances it, so each commit's
/// `occurred_at` is known in advance.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock forward by `step` and returns the new time.
    ///
    /// # Panics
    ///
    /// Panics if the clock's lock was poisoned by a panicking test thread.
    pub fn advance(&self, step: TimeDelta) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        *now += step;
        *now
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
