//! Clock Module
//!
//! Coarse millisecond time source shared by the store and the cache.
//!
//! Reading the clock is a single atomic load. A system clock is advanced by
//! the ticker task (see [`crate::tasks::spawn_clock_task`]); a manual clock
//! only moves when told to.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockSource {
    System,
    Manual,
}

// == Clock ==
/// Shared, cheaply cloneable timestamp in Unix milliseconds.
#[derive(Debug, Clone)]
pub struct Clock {
    now: Arc<AtomicI64>,
    source: ClockSource,
}

impl Clock {
    /// Creates a clock that follows wall-clock time on every [`tick`](Self::tick).
    pub fn system() -> Self {
        Self {
            now: Arc::new(AtomicI64::new(wall_clock_millis())),
            source: ClockSource::System,
        }
    }

    /// Creates a clock frozen at `start_millis` until moved explicitly.
    pub fn manual(start_millis: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_millis)),
            source: ClockSource::Manual,
        }
    }

    /// Returns the last recorded timestamp.
    pub fn now_millis(&self) -> i64 {
        self.now.load(Ordering::Relaxed)
    }

    /// Re-reads wall-clock time. No-op for a manual clock.
    pub fn tick(&self) -> i64 {
        match self.source {
            ClockSource::System => {
                let now = wall_clock_millis();
                self.now.fetch_max(now, Ordering::Relaxed).max(now)
            }
            ClockSource::Manual => self.now_millis(),
        }
    }

    /// Returns true if this clock needs a ticker task to advance.
    pub fn is_system(&self) -> bool {
        self.source == ClockSource::System
    }

    pub fn set_millis(&self, millis: i64) {
        self.now.store(millis, Ordering::Relaxed);
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) -> i64 {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(delta, Ordering::Relaxed).saturating_add(delta)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

/// Returns current Unix timestamp in milliseconds.
fn wall_clock_millis() -> i64 {
    Utc::now().timestamp_millis()
}
