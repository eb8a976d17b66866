//! Refresh Drain Task
//!
//! Background task that periodically drains the refresh queue and reloads
//! the queued keys.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::cache::engine::CacheInner;
use crate::cache::refresh::refresh_keys;
use crate::cache::{CacheKey, CacheValue};

/// Spawns the refresh drain loop for a cache.
///
/// Every `period` the queued keys are collapsed into a set and handed to a
/// separate refresh job, so a slow loader never delays the next drain.
/// Aborting the returned handle also aborts refresh jobs still running.
pub(crate) fn spawn_refresh_task<K, V>(inner: Arc<CacheInner<K, V>>, period: Duration) -> JoinHandle<()>
where
    K: CacheKey,
    V: CacheValue,
{
    tokio::spawn(async move {
        info!(
            "Starting refresh drain task with interval of {} ms",
            period.as_millis()
        );
        let mut jobs = JoinSet::new();

        loop {
            tokio::time::sleep(period).await;

            while let Some(finished) = jobs.try_join_next() {
                if let Err(error) = finished {
                    warn!("Refresh job did not complete: {}", error);
                }
            }

            let keys = inner.refresh_queue.drain();
            if keys.is_empty() {
                continue;
            }

            debug!("Refresh drain: scheduling {} keys", keys.len());
            let job_inner = Arc::clone(&inner);
            jobs.spawn(async move {
                refresh_keys(&job_inner, keys).await;
            });
        }
    })
}
