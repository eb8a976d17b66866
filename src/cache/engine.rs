//! Cache Engine Module
//!
//! Read path with TTL and refresh-window checks, single-flight miss loads,
//! and the wiring of the background jobs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::flight::{Claim, FlightTable};
use crate::cache::refresh::RefreshQueue;
use crate::cache::stats::StatsRecorder;
use crate::cache::{
    BatchLoader, CacheAdmin, CacheEntry, CacheKey, CacheStats, CacheStore, CacheValue, LoadBatch,
    LoadContext, SweepReport,
};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_clock_task, spawn_maintenance_task, spawn_refresh_task};

/// State shared between callers and the background jobs.
pub(crate) struct CacheInner<K, V> {
    pub(crate) config: CacheConfig,
    pub(crate) clock: Clock,
    pub(crate) store: Arc<CacheStore<K, V>>,
    pub(crate) loader: Arc<dyn BatchLoader<K, V>>,
    pub(crate) flights: FlightTable<K, V>,
    pub(crate) refresh_queue: RefreshQueue<K>,
    pub(crate) stats: StatsRecorder,
}

impl<K, V> CacheInner<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Runs the loader over `keys` and resolves any deferred values.
    pub(crate) async fn load_batch(
        &self,
        ctx: &LoadContext,
        keys: impl IntoIterator<Item = K>,
    ) -> anyhow::Result<Vec<(K, Option<V>)>> {
        let mut batch = LoadBatch::new(keys);
        self.loader.load(ctx, &mut batch).await?;
        batch.resolve().await
    }

    /// Loads the keys this caller won, stores them and settles their tickets.
    async fn load_owned(
        &self,
        claim: &mut Claim<'_, K, V>,
        ctx: &LoadContext,
    ) -> Result<HashMap<K, Arc<CacheEntry<V>>>> {
        let keys: Vec<K> = claim.owned_keys().cloned().collect();
        debug!("Loading {} missing keys", keys.len());

        match self.load_batch(ctx, keys.iter().cloned()).await {
            Ok(values) => {
                let now = self.clock.now_millis();
                let entries: HashMap<K, Arc<CacheEntry<V>>> = values
                    .into_iter()
                    .map(|(key, value)| {
                        let entry = Arc::new(CacheEntry::new(value, now));
                        self.store.put(key.clone(), Arc::clone(&entry));
                        (key, entry)
                    })
                    .collect();
                claim.complete(&entries);
                Ok(entries)
            }
            Err(source) => {
                let error = CacheError::load_failed(keys.iter(), source);
                claim.fail(&error);
                Err(error)
            }
        }
    }
}

// == Cache ==
/// In-process loading cache.
///
/// Concurrent misses for the same key share one loader call, stale entries
/// are served while a background job reloads them, and a maintenance job
/// keeps the store within its TTL and size limits.
///
/// Dropping the cache stops its background jobs and empties it.
pub struct Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    inner: Arc<CacheInner<K, V>>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
}

impl<K, V> Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    // == Constructor ==
    /// Creates a cache driven by the system clock.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<L>(loader: L, config: CacheConfig) -> Result<Self>
    where
        L: BatchLoader<K, V> + 'static,
    {
        Self::with_clock(loader, config, Clock::system())
    }

    /// Creates a cache reading time from `clock`.
    ///
    /// A ticker job is only started for a system clock.
    pub fn with_clock<L>(loader: L, config: CacheConfig, clock: Clock) -> Result<Self>
    where
        L: BatchLoader<K, V> + 'static,
    {
        Self::from_shared_loader(Arc::new(loader), config, clock)
    }

    /// Creates a cache around a loader that is already shared elsewhere.
    pub fn from_shared_loader(
        loader: Arc<dyn BatchLoader<K, V>>,
        config: CacheConfig,
        clock: Clock,
    ) -> Result<Self> {
        config.validate()?;
        Handle::try_current()
            .map_err(|e| CacheError::Internal(format!("cache requires a tokio runtime: {e}")))?;

        let store = Arc::new(CacheStore::from_config(&config, clock.clone()));
        let inner = Arc::new(CacheInner {
            config: config.clone(),
            clock: clock.clone(),
            store: Arc::clone(&store),
            loader,
            flights: FlightTable::new(),
            refresh_queue: RefreshQueue::new(),
            stats: StatsRecorder::new(),
        });

        let mut jobs = vec![
            spawn_refresh_task(Arc::clone(&inner), config.refresh_drain_period()),
            spawn_maintenance_task(store, config.maintenance_period()),
        ];
        if clock.is_system() {
            jobs.push(spawn_clock_task(clock, config.clock_tick()));
        }

        info!(
            "Cache started: ttl={}s, max_entries={}, batch_size={}",
            config.ttl_seconds, config.max_entries, config.batch_size
        );

        Ok(Self {
            inner,
            jobs: Mutex::new(jobs),
        })
    }

    // == Get ==
    /// Returns the values for `keys`, loading missing ones.
    ///
    /// Same as [`get_with_context`](Self::get_with_context) with a fresh miss context.
    pub async fn get<I>(&self, keys: I, refresh_seconds: i64, ttl_seconds: i64) -> Result<HashMap<K, V>>
    where
        I: IntoIterator<Item = K>,
    {
        self.get_with_context(keys, refresh_seconds, ttl_seconds, &LoadContext::miss())
            .await
    }

    /// Returns the values for `keys`, loading missing ones through the loader.
    ///
    /// - Entries older than `ttl_seconds` are dropped and reloaded.
    /// - Entries older than `refresh_seconds` are served as is and queued for
    ///   a background refresh, once per entry.
    /// - Keys the loader found nothing for are left out of the result.
    ///
    /// A non-positive window disables that check. A loader failure fails the
    /// whole call, and every caller waiting on the same keys gets the same error.
    pub async fn get_with_context<I>(
        &self,
        keys: I,
        refresh_seconds: i64,
        ttl_seconds: i64,
        ctx: &LoadContext,
    ) -> Result<HashMap<K, V>>
    where
        I: IntoIterator<Item = K>,
    {
        let inner = &self.inner;
        let keys: HashSet<K> = keys.into_iter().collect();
        let now = inner.clock.now_millis();

        let mut found = inner.store.get_all(keys.iter());
        let mut resolved: HashMap<K, Arc<CacheEntry<V>>> = HashMap::with_capacity(keys.len());
        let mut misses = Vec::new();

        for key in keys {
            match found.remove(&key) {
                Some(entry) if entry.is_expired(now, ttl_seconds) => {
                    inner.store.remove_if(&key, &entry);
                    misses.push(key);
                }
                Some(entry) => {
                    if entry.is_refresh_due(now, refresh_seconds) && entry.try_mark_refresh_pending() {
                        inner.refresh_queue.push(key.clone());
                    }
                    resolved.insert(key, entry);
                }
                None => misses.push(key),
            }
        }

        inner.stats.record_hits(resolved.len() as u64);
        inner.stats.record_misses(misses.len() as u64);

        if !misses.is_empty() {
            let mut claim = inner.flights.claim(misses);
            if claim.owns_any() {
                let loaded = inner.load_owned(&mut claim, ctx).await?;
                resolved.extend(loaded);
            }
            resolved.extend(claim.wait().await?);
        }

        Ok(resolved
            .into_iter()
            .filter_map(|(key, entry)| entry.value().cloned().map(|value| (key, value)))
            .collect())
    }

    /// Single-key form of [`get`](Self::get).
    pub async fn get_one(&self, key: K, refresh_seconds: i64, ttl_seconds: i64) -> Result<Option<V>> {
        let mut values = self.get([key.clone()], refresh_seconds, ttl_seconds).await?;
        Ok(values.remove(&key))
    }

    // == Put ==
    /// Stores `value` for `key`; `None` removes the key instead.
    pub fn put(&self, key: K, value: impl Into<Option<V>>) {
        match value.into() {
            Some(value) => {
                let entry = CacheEntry::new(Some(value), self.inner.clock.now_millis());
                self.inner.store.put(key, Arc::new(entry));
            }
            None => {
                self.inner.store.remove(&key);
            }
        }
    }

    // == Remove ==
    /// Removes `key`. Returns true if an entry was removed.
    pub fn remove(&self, key: &K) -> bool {
        self.inner.store.remove(key).is_some()
    }

    /// Removes `key` only if its stored value still equals `expected`.
    ///
    /// `None` matches an entry cached as not found.
    pub fn remove_if(&self, key: &K, expected: Option<&V>) -> bool
    where
        V: PartialEq,
    {
        self.inner
            .store
            .remove_if_with(key, |entry| entry.value() == expected)
    }

    // == Refresh ==
    /// Queues `key` for background refresh.
    ///
    /// Returns false if the key is absent or already queued.
    pub fn refresh(&self, key: &K) -> bool {
        match self.inner.store.peek(key) {
            Some(entry) if entry.try_mark_refresh_pending() => {
                self.inner.refresh_queue.push(key.clone());
                true
            }
            _ => false,
        }
    }

    /// Keys queued for the next refresh drain (duplicates included).
    pub fn pending_refreshes(&self) -> usize {
        self.inner.refresh_queue.len()
    }

    /// Number of synchronous loads currently in flight.
    pub fn in_flight_loads(&self) -> usize {
        self.inner.flights.len()
    }

    /// Returns the stored entry for `key` without counting as an access.
    pub fn entry(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
        self.inner.store.peek(key)
    }

    /// Clock the cache stamps entries with.
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Runs a maintenance pass immediately.
    pub fn run_maintenance(&self) -> SweepReport {
        self.inner.store.sweep()
    }

    // == Shutdown ==
    /// Stops the background jobs and empties the refresh queue and the store.
    ///
    /// Loads already running on a caller's task are not interrupted.
    pub fn shutdown(&self) {
        let jobs: Vec<JoinHandle<()>> = self.jobs.lock().drain(..).collect();
        if jobs.is_empty() {
            return;
        }
        for job in jobs {
            job.abort();
        }
        self.inner.refresh_queue.clear();
        self.inner.store.clear();
        info!("Cache shut down");
    }

    /// True once [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

impl<K, V> CacheAdmin for Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn hits(&self) -> u64 {
        self.inner.stats.hits()
    }

    fn misses(&self) -> u64 {
        self.inner.stats.misses()
    }

    fn size(&self) -> usize {
        self.inner.store.len()
    }

    fn max_size(&self) -> Option<usize> {
        self.inner.store.capacity()
    }

    fn clear(&self) {
        self.inner.store.clear();
    }

    fn reset_stats(&self) {
        self.inner.stats.reset();
    }
}

impl<K, V> Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Snapshot of counters and size.
    pub fn stats(&self) -> CacheStats {
        CacheAdmin::stats(self)
    }
}

impl<K, V> Drop for Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .field("in_flight", &self.inner.flights.len())
            .field("pending_refreshes", &self.inner.refresh_queue.len())
            .finish()
    }
}
