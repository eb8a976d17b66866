//! Cache Store Module
//!
//! Concurrent key to entry map with a TTL sweep and a capacity bound.
//!
//! Reads never scan: recency is an atomic timestamp bumped on every hit, and
//! the maintenance pass sorts by it to evict the least recently used excess.
//! There is no reclaimable tier, so eviction is fully deterministic.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::cache::CacheEntry;
use crate::clock::Clock;
use crate::config::CacheConfig;

struct Slot<V> {
    entry: Arc<CacheEntry<V>>,
    last_access: AtomicI64,
}

impl<V> Slot<V> {
    fn new(entry: Arc<CacheEntry<V>>, now: i64) -> Self {
        Self {
            entry,
            last_access: AtomicI64::new(now),
        }
    }
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries dropped for exceeding the store TTL
    pub expired: usize,
    /// Entries dropped to get back under `max_entries`
    pub evicted: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.expired + self.evicted
    }
}

// == Cache Store ==
/// Backing map for the cache.
///
/// A key is either absent or maps to exactly one entry; `put` replaces the
/// whole entry atomically.
pub struct CacheStore<K, V> {
    entries: DashMap<K, Slot<V>>,
    clock: Clock,
    /// Store TTL in seconds, `None` = unlimited
    ttl_seconds: Option<i64>,
    /// Maximum number of entries allowed, `None` = unlimited
    max_entries: Option<usize>,
}

impl<K, V> CacheStore<K, V>
where
    K: Eq + Hash + Clone,
{
    // == Constructor ==
    /// Creates a store. Non-positive `ttl_seconds` or `max_entries` mean unlimited.
    pub fn new(clock: Clock, ttl_seconds: i64, max_entries: i64) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            ttl_seconds: (ttl_seconds > 0).then_some(ttl_seconds),
            max_entries: usize::try_from(max_entries).ok().filter(|max| *max > 0),
        }
    }

    pub fn from_config(config: &CacheConfig, clock: Clock) -> Self {
        Self::new(clock, config.ttl_seconds, config.max_entries)
    }

    // == Get ==
    /// Returns the entry for `key` and marks it as recently used.
    pub fn get(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
        let slot = self.entries.get(key)?;
        slot.last_access
            .store(self.clock.now_millis(), Ordering::Relaxed);
        Some(Arc::clone(&slot.entry))
    }

    /// Returns the entry for `key` without touching its recency.
    pub fn peek(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
        self.entries.get(key).map(|slot| Arc::clone(&slot.entry))
    }

    /// Bulk read. Keys with no entry are left out of the result.
    pub fn get_all<'a, I>(&self, keys: I) -> HashMap<K, Arc<CacheEntry<V>>>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        keys.into_iter()
            .filter_map(|key| self.get(key).map(|entry| (key.clone(), entry)))
            .collect()
    }

    // == Put ==
    /// Inserts or replaces the entry for `key`.
    pub fn put(&self, key: K, entry: Arc<CacheEntry<V>>) {
        let slot = Slot::new(entry, self.clock.now_millis());
        self.entries.insert(key, slot);
    }

    // == Remove ==
    pub fn remove(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
        self.entries.remove(key).map(|(_, slot)| slot.entry)
    }

    /// Removes `key` only while it still maps to `expected` (same allocation).
    pub fn remove_if(&self, key: &K, expected: &Arc<CacheEntry<V>>) -> bool {
        self.remove_if_with(key, |current| std::ptr::eq(current, Arc::as_ptr(expected)))
    }

    /// Removes `key` only if `predicate` accepts its current entry.
    ///
    /// The check and the delete happen under the same shard lock.
    pub fn remove_if_with<F>(&self, key: &K, predicate: F) -> bool
    where
        F: FnOnce(&CacheEntry<V>) -> bool,
    {
        self.entries
            .remove_if(key, |_, slot| predicate(&slot.entry))
            .is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.max_entries
    }

    pub fn ttl_seconds(&self) -> Option<i64> {
        self.ttl_seconds
    }

    // == Sweep ==
    /// Runs one maintenance pass: TTL sweep, then capacity eviction.
    pub fn sweep(&self) -> SweepReport {
        let expired = self.remove_expired();
        let evicted = self.evict_over_capacity();
        SweepReport { expired, evicted }
    }

    /// Removes entries created more than the store TTL ago.
    fn remove_expired(&self) -> usize {
        let Some(ttl) = self.ttl_seconds else {
            return 0;
        };
        let now = self.clock.now_millis();
        let before = self.entries.len();

        self.entries.retain(|_, slot| !slot.entry.is_expired(now, ttl));

        before.saturating_sub(self.entries.len())
    }

    /// Evicts the least recently used entries above `max_entries`.
    ///
    /// Best effort: accesses that land while the snapshot is sorted are not
    /// seen, and entries replaced in the meantime are left alone.
    fn evict_over_capacity(&self) -> usize {
        let Some(max) = self.max_entries else {
            return 0;
        };
        let excess = self.entries.len().saturating_sub(max);
        if excess == 0 {
            return 0;
        }

        let mut by_recency: Vec<(K, i64, Arc<CacheEntry<V>>)> = self
            .entries
            .iter()
            .map(|slot| {
                (
                    slot.key().clone(),
                    slot.last_access.load(Ordering::Relaxed),
                    Arc::clone(&slot.entry),
                )
            })
            .collect();
        by_recency.sort_by_key(|(_, last_access, _)| *last_access);

        by_recency
            .into_iter()
            .take(excess)
            .filter(|(key, _, entry)| self.remove_if(key, entry))
            .count()
    }
}

impl<K: Eq + Hash, V> std::fmt::Debug for CacheStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("ttl_seconds", &self.ttl_seconds)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
