//! Store Maintenance Task
//!
//! Background task that periodically sweeps expired entries and trims the
//! store back to its capacity.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheStore;

/// Spawns a background task that runs [`CacheStore::sweep`] every `period`.
///
/// # Returns
/// A JoinHandle for the spawned task; aborting it stops maintenance.
///
/// # Example
/// ```ignore
/// let store = Arc::new(CacheStore::new(Clock::system(), 300, 1000));
/// let maintenance = spawn_maintenance_task(store.clone(), Duration::from_secs(2));
/// // Later, during shutdown:
/// maintenance.abort();
/// ```
pub fn spawn_maintenance_task<K, V>(store: Arc<CacheStore<K, V>>, period: Duration) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(
            "Starting store maintenance task with interval of {} ms",
            period.as_millis()
        );

        loop {
            tokio::time::sleep(period).await;

            let report = store.sweep();

            if report.total() > 0 {
                info!(
                    "Store maintenance: removed {} expired and {} over-capacity entries",
                    report.expired, report.evicted
                );
            } else {
                debug!("Store maintenance: nothing to remove");
            }
        }
    })
}
