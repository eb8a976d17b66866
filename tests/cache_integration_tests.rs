//! Integration Tests for the Loading Cache
//!
//! Exercises the public API end to end: miss loads, single-flight
//! coalescing, TTL expiry, refresh-ahead, compare-and-delete and the admin
//! surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};

use loadcache::{
    loader_fn, BatchLoader, Cache, CacheAdmin, CacheConfig, CacheError, Clock, LoadBatch,
    LoadContext, LoadOrigin,
};

const T0: i64 = 1_700_000_000_000;

// == Helpers ==

/// Loader that counts calls, optionally sleeps, and can be told to fail.
///
/// Values are `"<key>#<call number>"`; `"a"`, `"b"` and `"x"` have fixed
/// values so scenarios can assert on them directly.
struct TestLoader {
    calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    delay: Duration,
    fail_misses: AtomicBool,
    fail_refreshes: AtomicBool,
}

impl TestLoader {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            delay,
            fail_misses: AtomicBool::new(false),
            fail_refreshes: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchLoader<String, String> for TestLoader {
    async fn load(&self, ctx: &LoadContext, batch: &mut LoadBatch<String, String>) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if ctx.origin() == LoadOrigin::Refresh {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = match ctx.origin() {
            LoadOrigin::Miss => &self.fail_misses,
            LoadOrigin::Refresh => &self.fail_refreshes,
        };
        if failing.load(Ordering::SeqCst) {
            anyhow::bail!("backend unavailable");
        }

        let keys: Vec<String> = batch.keys().cloned().collect();
        for key in keys {
            let value = match key.as_str() {
                "a" => "1".to_string(),
                "b" => "2".to_string(),
                "x" => "42".to_string(),
                other => format!("{other}#{call}"),
            };
            batch.insert(&key, value);
        }
        Ok(())
    }
}

fn config() -> CacheConfig {
    CacheConfig {
        refresh_drain_period_ms: 20,
        maintenance_period_ms: 3_600_000,
        ..CacheConfig::default()
    }
}

fn cache_with(loader: &Arc<TestLoader>, config: CacheConfig) -> (Arc<Cache<String, String>>, Clock) {
    let clock = Clock::manual(T0);
    let shared: Arc<dyn BatchLoader<String, String>> = loader.clone();
    let cache = Cache::from_shared_loader(shared, config, clock.clone()).unwrap();
    (Arc::new(cache), clock)
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

// == Scenario A: cold cache ==

#[tokio::test]
async fn test_cold_cache_loads_all_keys() {
    let loader = TestLoader::new(Duration::ZERO);
    let (cache, _) = cache_with(&loader, config());

    let values = assert_ok!(cache.get(keys(&["a", "b"]), 0, 0).await);

    let expected = HashMap::from([
        ("a".to_string(), "1".to_string()),
        ("b".to_string(), "2".to_string()),
    ]);
    assert_eq!(values, expected);
    assert_eq!(cache.misses(), 2);
    assert_eq!(cache.hits(), 0);
    assert_eq!(loader.calls(), 1);
}

// == Scenario B: single-flight ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_load() {
    let loader = TestLoader::new(Duration::from_millis(100));
    let (cache, _) = cache_with(&loader, config());

    let first = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(keys(&["x"]), 0, 0).await })
    };
    let second = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(keys(&["x"]), 0, 0).await })
    };

    let first = assert_ok!(first.await.unwrap());
    let second = assert_ok!(second.await.unwrap());

    assert_eq!(first["x"], "42");
    assert_eq!(second["x"], "42");
    assert_eq!(loader.calls(), 1);
    assert_eq!(cache.in_flight_loads(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_callers_one_loader_call_per_key() {
    let loader = TestLoader::new(Duration::from_millis(50));
    let (cache, _) = cache_with(&loader, config());

    let callers: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(keys(&["hot"]), 0, 0).await })
        })
        .collect();

    let mut seen = Vec::new();
    for caller in callers {
        let values = assert_ok!(caller.await.unwrap());
        seen.push(values["hot"].clone());
    }

    assert_eq!(loader.calls(), 1);
    assert!(seen.iter().all(|value| value == "hot#1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_failure_reaches_every_waiter() {
    let loader = TestLoader::new(Duration::from_millis(100));
    loader.fail_misses.store(true, Ordering::SeqCst);
    let (cache, _) = cache_with(&loader, config());

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(keys(&["doomed"]), 0, 0).await })
        })
        .collect();

    for caller in callers {
        let err = assert_err!(caller.await.unwrap());
        match err {
            CacheError::LoadFailed { keys, source } => {
                assert!(keys.contains("doomed"));
                assert!(source.to_string().contains("backend unavailable"));
            }
            other => panic!("expected LoadFailed, got {other:?}"),
        }
    }

    assert_eq!(loader.calls(), 1);
    assert_eq!(cache.in_flight_loads(), 0);
    assert!(cache.entry(&"doomed".to_string()).is_none());

    // the key is loadable again once the backend recovers
    loader.fail_misses.store(false, Ordering::SeqCst);
    let values = assert_ok!(cache.get(keys(&["doomed"]), 0, 0).await);
    assert_eq!(values["doomed"], "doomed#2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_load_releases_waiters() {
    let loader = TestLoader::new(Duration::from_millis(200));
    let (cache, _) = cache_with(&loader, config());

    let owner = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(keys(&["slow"]), 0, 0).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let waiter = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(keys(&["slow"]), 0, 0).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    owner.abort();

    let err = assert_err!(waiter.await.unwrap());
    assert!(matches!(err, CacheError::LoadAbandoned { .. }));
    assert_eq!(cache.in_flight_loads(), 0);
}

// == Scenario C: put then get ==

#[tokio::test]
async fn test_put_then_get_is_a_hit() {
    let loader = TestLoader::new(Duration::ZERO);
    let (cache, _) = cache_with(&loader, config());

    cache.put("k".to_string(), "v".to_string());
    let values = assert_ok!(cache.get(keys(&["k"]), 0, 0).await);

    assert_eq!(values["k"], "v");
    assert_eq!(loader.calls(), 0);
    assert_eq!(cache.hits(), 1);
    assert_eq!(cache.misses(), 0);
}

// == Scenario D: TTL expiry ==

#[tokio::test]
async fn test_expired_entry_is_reloaded() {
    let loader = TestLoader::new(Duration::ZERO);
    let (cache, clock) = cache_with(&loader, config());

    let first = assert_ok!(cache.get_one("k".to_string(), 0, 10).await);
    assert_eq!(first.as_deref(), Some("k#1"));

    clock.advance(Duration::from_secs(11));
    let second = assert_ok!(cache.get_one("k".to_string(), 0, 10).await);

    assert_eq!(second.as_deref(), Some("k#2"));
    assert_eq!(loader.calls(), 2);
    assert_eq!(cache.misses(), 2);
    let entry = cache.entry(&"k".to_string()).unwrap();
    assert_eq!(entry.created_millis(), T0 + 11_000);
}

#[tokio::test]
async fn test_entry_within_ttl_is_served() {
    let loader = TestLoader::new(Duration::ZERO);
    let (cache, clock) = cache_with(&loader, config());

    assert_ok!(cache.get(keys(&["k"]), 0, 10).await);
    clock.advance(Duration::from_secs(10));
    assert_ok!(cache.get(keys(&["k"]), 0, 10).await);

    assert_eq!(loader.calls(), 1);
}

// == Scenario E: refresh-ahead ==

#[tokio::test]
async fn test_stale_entry_served_then_refreshed() {
    let loader = TestLoader::new(Duration::ZERO);
    let (cache, clock) = cache_with(&loader, config());

    assert_ok!(cache.get(keys(&["k"]), 5, 100).await);
    clock.advance(Duration::from_secs(6));

    let stale = assert_ok!(cache.get(keys(&["k"]), 5, 100).await);
    assert_eq!(stale["k"], "k#1");
    assert_eq!(cache.hits(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let entry = cache.entry(&"k".to_string()).unwrap();
    assert_eq!(entry.created_millis(), T0 + 6_000);
    assert_eq!(entry.value().map(String::as_str), Some("k#2"));
    assert!(!entry.is_refresh_pending());
    assert_eq!(loader.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_repeated_stale_reads_refresh_once() {
    let loader = TestLoader::new(Duration::ZERO);
    let (cache, clock) = cache_with(&loader, config());

    assert_ok!(cache.get(keys(&["k"]), 5, 0).await);
    clock.advance(Duration::from_secs(6));
    for _ in 0..5 {
        assert_ok!(cache.get(keys(&["k"]), 5, 0).await);
    }
    cache.refresh(&"k".to_string());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(loader.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_refresh_keeps_stale_entry_flagged() {
    let loader = TestLoader::new(Duration::ZERO);
    loader.fail_refreshes.store(true, Ordering::SeqCst);
    let (cache, clock) = cache_with(&loader, config());

    assert_ok!(cache.get(keys(&["k"]), 5, 0).await);
    clock.advance(Duration::from_secs(6));
    assert_ok!(cache.get(keys(&["k"]), 5, 0).await);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let entry = cache.entry(&"k".to_string()).unwrap();
    assert_eq!(entry.created_millis(), T0);
    assert!(entry.is_refresh_pending());

    // still stale, but not queued again
    let values = assert_ok!(cache.get(keys(&["k"]), 5, 0).await);
    assert_eq!(values["k"], "k#1");
    assert_eq!(cache.pending_refreshes(), 0);
}

#[tokio::test]
async fn test_explicit_refresh_replaces_entry() {
    let loader = TestLoader::new(Duration::ZERO);
    let (cache, clock) = cache_with(&loader, config());

    cache.put("k".to_string(), "manual".to_string());
    clock.advance(Duration::from_secs(1));
    assert!(cache.refresh(&"k".to_string()));
    assert!(!cache.refresh(&"k".to_string()));

    tokio::time::sleep(Duration::from_millis(200)).await;

    let values = assert_ok!(cache.get(keys(&["k"]), 0, 0).await);
    assert_eq!(values["k"], "k#1");
}

#[tokio::test]
async fn test_refresh_result_lands_after_concurrent_remove() {
    let loader = TestLoader::new(Duration::from_millis(100));
    let (cache, _) = cache_with(&loader, config());
    let key = "k".to_string();

    cache.put(key.clone(), "v".to_string());
    assert!(cache.refresh(&key));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(loader.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(cache.remove(&key));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        cache.entry(&key).unwrap().value().map(String::as_str),
        Some("k#1")
    );
}

// == Scenario F: compare-and-delete ==

#[tokio::test]
async fn test_remove_if_only_matches_current_value() {
    let loader = TestLoader::new(Duration::ZERO);
    let (cache, _) = cache_with(&loader, config());
    let key = "k".to_string();

    cache.put(key.clone(), "V".to_string());
    // another writer replaced the value
    cache.put(key.clone(), "W".to_string());

    assert!(!cache.remove_if(&key, Some(&"V".to_string())));
    assert_eq!(
        cache.entry(&key).unwrap().value().map(String::as_str),
        Some("W")
    );

    assert!(cache.remove_if(&key, Some(&"W".to_string())));
    assert!(cache.entry(&key).is_none());
}

#[tokio::test]
async fn test_remove_drops_entry_and_forces_reload() {
    let loader = TestLoader::new(Duration::ZERO);
    let (cache, _) = cache_with(&loader, config());
    let key = "k".to_string();

    assert_ok!(cache.get(keys(&["k"]), 0, 0).await);
    assert_eq!(loader.calls(), 1);

    assert!(cache.remove(&key));
    assert!(cache.entry(&key).is_none());
    assert!(!cache.remove(&key));

    let values = assert_ok!(cache.get(keys(&["k"]), 0, 0).await);
    assert_eq!(values["k"], "k#2");
    assert_eq!(loader.calls(), 2);
}

// == Shutdown ==

#[tokio::test]
async fn test_shutdown_interrupts_running_refresh() {
    let loader = TestLoader::new(Duration::from_millis(300));
    let (cache, _) = cache_with(&loader, config());
    let key = "k".to_string();

    cache.put(key.clone(), "v".to_string());
    assert!(cache.refresh(&key));

    // let the drain pick the key up and block inside the loader
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(loader.refresh_calls.load(Ordering::SeqCst), 1);

    cache.shutdown();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(cache.size(), 0);
    assert!(cache.entry(&key).is_none());
    assert_eq!(loader.calls(), 1);
}

// == Capacity and admin ==

#[tokio::test]
async fn test_maintenance_enforces_capacity() {
    let loader = TestLoader::new(Duration::ZERO);
    let config = CacheConfig {
        max_entries: 3,
        ..config()
    };
    let (cache, clock) = cache_with(&loader, config);

    for key in ["a", "b", "c", "d", "e"] {
        cache.put(key.to_string(), key.to_string());
        clock.advance(Duration::from_millis(10));
    }
    // keep "a" warm
    assert_ok!(cache.get(keys(&["a"]), 0, 0).await);

    let report = cache.run_maintenance();

    assert_eq!(report.evicted, 2);
    assert_eq!(cache.size(), 3);
    assert!(cache.entry(&"a".to_string()).is_some());
    assert!(cache.entry(&"b".to_string()).is_none());
    assert!(cache.entry(&"c".to_string()).is_none());
}

#[tokio::test]
async fn test_admin_surface() {
    let loader = TestLoader::new(Duration::ZERO);
    let config = CacheConfig {
        max_entries: 50,
        ..config()
    };
    let (cache, _) = cache_with(&loader, config);

    assert_ok!(cache.get(keys(&["a", "b"]), 0, 0).await);
    assert_ok!(cache.get(keys(&["a"]), 0, 0).await);

    let admin: Arc<dyn CacheAdmin> = cache.clone();
    assert_eq!(admin.hits(), 1);
    assert_eq!(admin.misses(), 2);
    assert_eq!(admin.size(), 2);
    assert_eq!(admin.max_size(), Some(50));

    let stats = admin.stats();
    assert!((stats.hit_rate() - 1.0 / 3.0).abs() < f64::EPSILON);

    admin.reset_stats();
    assert_eq!(admin.hits(), 0);
    assert_eq!(admin.misses(), 0);
    assert_eq!(admin.size(), 2);

    admin.clear();
    assert_eq!(admin.size(), 0);
}

#[tokio::test]
async fn test_caller_context_reaches_loader() {
    let loader = loader_fn(|ctx: &LoadContext, batch: &mut LoadBatch<String, String>| {
        let tenant = ctx
            .binding("tenant")
            .and_then(|value| value.as_str())
            .unwrap_or("none")
            .to_string();
        let keys: Vec<String> = batch.keys().cloned().collect();
        for key in keys {
            batch.insert(&key, format!("{tenant}/{key}"));
        }
        Ok(())
    });
    let cache = Cache::with_clock(loader, config(), Clock::manual(T0)).unwrap();

    let ctx = LoadContext::miss().with_binding("tenant", "acme");
    let values = assert_ok!(cache.get_with_context(keys(&["k"]), 0, 0, &ctx).await);

    assert_eq!(values["k"], "acme/k");
}

#[tokio::test]
async fn test_deferred_values_are_resolved_before_storing() {
    let loader = loader_fn(|_: &LoadContext, batch: &mut LoadBatch<String, String>| {
        let keys: Vec<String> = batch.keys().cloned().collect();
        for key in keys {
            let value = format!("later-{key}");
            batch.defer(&key, async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, anyhow::Error>(Some(value))
            });
        }
        Ok(())
    });
    let cache = Cache::with_clock(loader, config(), Clock::manual(T0)).unwrap();

    let values = assert_ok!(cache.get(keys(&["p", "q"]), 0, 0).await);

    assert_eq!(values["p"], "later-p");
    assert_eq!(values["q"], "later-q");
    assert_eq!(
        cache.entry(&"p".to_string()).unwrap().value().map(String::as_str),
        Some("later-p")
    );
}

#[tokio::test]
async fn test_system_clock_cache_serves_values() {
    let loader = TestLoader::new(Duration::ZERO);
    let shared: Arc<dyn BatchLoader<String, String>> = loader.clone();
    let cache = Cache::from_shared_loader(shared, config(), Clock::system()).unwrap();

    let values = assert_ok!(cache.get(keys(&["a"]), 30, 300).await);
    assert_eq!(values["a"], "1");

    cache.shutdown();
    assert!(cache.is_shut_down());
    assert_eq!(cache.size(), 0);
}
