//! Cache Statistics Module
//!
//! Tracks hit and miss counters for `Cache::get`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Stats Recorder ==
/// Lock-free counters updated on every read.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hits(&self, count: u64) {
        if count > 0 {
            self.hits.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_misses(&self, count: u64) {
        if count > 0 {
            self.misses.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Zeroes both counters.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

// == Cache Stats ==
/// Point-in-time view of the cache counters and size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Keys served from the store
    pub hits: u64,
    /// Keys that had to be loaded synchronously
    pub misses: u64,
    /// Current number of entries in the store
    pub size: usize,
    /// Entry limit enforced by maintenance, `None` = unlimited
    pub max_size: Option<usize>,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
