//! Refresh Module
//!
//! Queue of stale keys and the batch job that reloads them in the background.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::engine::CacheInner;
use crate::cache::{CacheEntry, CacheKey, CacheValue, LoadContext};

// == Refresh Queue ==
/// Keys waiting for the next refresh drain.
///
/// Duplicates are allowed here and collapse when drained.
#[derive(Debug)]
pub(crate) struct RefreshQueue<K> {
    keys: Mutex<Vec<K>>,
}

impl<K> RefreshQueue<K>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, key: K) {
        self.keys.lock().push(key);
    }

    /// Takes every queued key, deduplicated.
    pub fn drain(&self) -> HashSet<K> {
        let keys = std::mem::take(&mut *self.keys.lock());
        keys.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn clear(&self) {
        self.keys.lock().clear();
    }
}

/// Outcome of one refresh job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Keys whose entry was replaced
    pub refreshed: usize,
    /// Keys in chunks the loader failed on; their entries stay stale
    pub failed: usize,
}

// == Refresh Keys ==
/// Reloads `keys` in chunks of the configured batch size.
///
/// One context is built for the whole job. A failing chunk is logged and
/// skipped; the remaining chunks still run. Failed keys keep their
/// pending-refresh flag, so they are not queued again until their entry is
/// replaced by a fresh load.
///
/// Results are stored unconditionally, so a key removed while its refresh is
/// running comes back with the refreshed value.
pub(crate) async fn refresh_keys<K, V>(inner: &CacheInner<K, V>, keys: HashSet<K>) -> RefreshReport
where
    K: CacheKey,
    V: CacheValue,
{
    let ctx = LoadContext::refresh();
    let keys: Vec<K> = keys.into_iter().collect();
    let mut report = RefreshReport::default();

    for chunk in keys.chunks(inner.config.batch_size.max(1)) {
        match inner.load_batch(&ctx, chunk.iter().cloned()).await {
            Ok(values) => {
                let now = inner.clock.now_millis();
                report.refreshed += values.len();
                for (key, value) in values {
                    inner.store.put(key, Arc::new(CacheEntry::new(value, now)));
                }
            }
            Err(error) => {
                report.failed += chunk.len();
                warn!(
                    "Refresh of {} keys failed, keeping stale entries: {:#}",
                    chunk.len(),
                    error
                );
            }
        }
    }

    debug!(
        "Refresh job finished: {} refreshed, {} failed",
        report.refreshed, report.failed
    );
    report
}
