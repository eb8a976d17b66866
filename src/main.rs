//! Loadcache demo - drives a cache with a synthetic loader
//!
//! Runs a handful of reader tasks against a shared cache and logs the cache
//! statistics until interrupted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loadcache::{BatchLoader, Cache, CacheAdmin, CacheConfig, LoadBatch, LoadContext};

const READERS: usize = 4;
const KEY_SPACE: u64 = 200;
const REFRESH_SECONDS: i64 = 5;
const TTL_SECONDS: i64 = 30;

/// Pretends to be a slow backend: every batch costs a fixed latency and odd
/// keys arrive as deferred values.
struct SlowBackend {
    calls: AtomicU64,
}

#[async_trait]
impl BatchLoader<u64, String> for SlowBackend {
    async fn load(&self, ctx: &LoadContext, batch: &mut LoadBatch<u64, String>) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let keys: Vec<u64> = batch.keys().copied().collect();
        for key in keys {
            if key % 2 == 0 {
                batch.insert(&key, format!("{key}@{call}"));
            } else {
                batch.defer(&key, async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, anyhow::Error>(Some(format!("{key}@{call}")))
                });
            }
        }

        info!(
            "Loader call {} ({:?}) filled {} keys",
            call,
            ctx.origin(),
            batch.len()
        );
        Ok(())
    }
}

/// Entry point for the loadcache demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache with the synthetic loader
/// 4. Start reader tasks and a stats reporter
/// 5. Shut the cache down on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loadcache=info,loadcache_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting loadcache demo");

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: ttl={}s, max_entries={}, batch_size={}, refresh_drain={}ms, maintenance={}ms",
        config.ttl_seconds,
        config.max_entries,
        config.batch_size,
        config.refresh_drain_period_ms,
        config.maintenance_period_ms
    );

    let loader = SlowBackend {
        calls: AtomicU64::new(0),
    };
    let cache = Arc::new(Cache::new(loader, config)?);

    let mut readers = Vec::with_capacity(READERS);
    for reader in 0..READERS as u64 {
        let cache = Arc::clone(&cache);
        readers.push(tokio::spawn(async move {
            let mut step = reader;
            loop {
                let keys = [step % KEY_SPACE, (step * 7 + 3) % KEY_SPACE];
                if let Err(error) = cache.get(keys, REFRESH_SECONDS, TTL_SECONDS).await {
                    warn!("Reader {} failed: {}", reader, error);
                }
                step += READERS as u64;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }));
    }

    let reporter = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let stats = cache.stats();
                match serde_json::to_string(&stats) {
                    Ok(json) => info!("Stats {} (hit rate {:.2})", json, stats.hit_rate()),
                    Err(error) => warn!("Could not serialize stats: {}", error),
                }
            }
        })
    };

    shutdown_signal().await;

    reporter.abort();
    for reader in readers {
        reader.abort();
    }
    info!(
        "Final counters: hits={}, misses={}, size={}",
        cache.hits(),
        cache.misses(),
        cache.size()
    );
    cache.shutdown();

    info!("Demo shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", error);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!("Failed to install SIGTERM handler: {}", error);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
