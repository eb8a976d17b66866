//! Cache Entry Module
//!
//! Defines the immutable value record stored for each key.

use std::sync::atomic::{AtomicBool, Ordering};

// == Cache Entry ==
/// A loaded value plus the metadata needed for TTL and refresh decisions.
///
/// The value is fixed at construction; updating a key means storing a new
/// entry. `None` records that the loader found nothing for the key.
#[derive(Debug)]
pub struct CacheEntry<V> {
    value: Option<V>,
    /// Creation timestamp (Unix milliseconds, from the cache clock)
    created: i64,
    /// Set once the key has been queued for background refresh
    pending_refresh: AtomicBool,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    pub fn new(value: Option<V>, created_millis: i64) -> Self {
        Self {
            value,
            created: created_millis,
            pending_refresh: AtomicBool::new(false),
        }
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn created_millis(&self) -> i64 {
        self.created
    }

    pub fn age_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.created)
    }

    // == Is Expired ==
    /// Checks whether the entry is older than `ttl_seconds`.
    ///
    /// A non-positive TTL never expires. An entry exactly `ttl_seconds` old is
    /// still servable; it expires once its creation time falls strictly before
    /// `now - ttl`.
    pub fn is_expired(&self, now_millis: i64, ttl_seconds: i64) -> bool {
        is_older_than(self.created, now_millis, ttl_seconds)
    }

    // == Is Refresh Due ==
    /// Same comparison as [`is_expired`](Self::is_expired) against the refresh window.
    pub fn is_refresh_due(&self, now_millis: i64, refresh_seconds: i64) -> bool {
        is_older_than(self.created, now_millis, refresh_seconds)
    }

    // == Mark Refresh Pending ==
    /// Claims the right to enqueue this entry for refresh.
    ///
    /// Returns true for exactly one caller over the lifetime of the entry.
    pub fn try_mark_refresh_pending(&self) -> bool {
        self.pending_refresh
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_refresh_pending(&self) -> bool {
        self.pending_refresh.load(Ordering::Acquire)
    }
}

fn is_older_than(created: i64, now_millis: i64, window_seconds: i64) -> bool {
    if window_seconds <= 0 {
        return false;
    }
    let cutoff = now_millis.saturating_sub(window_seconds.saturating_mul(1000));
    created < cutoff
}
