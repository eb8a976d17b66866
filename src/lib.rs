//! Loadcache - an in-process loading cache
//!
//! Deduplicates concurrent loads of missing keys, serves stale values while
//! refreshing them in the background, and bounds memory with TTL expiry and
//! LRU eviction.
//!
//! ```ignore
//! let loader = loader_fn(|_ctx: &LoadContext, batch: &mut LoadBatch<String, String>| {
//!     let keys: Vec<String> = batch.keys().cloned().collect();
//!     for key in keys {
//!         batch.insert(&key, key.to_uppercase());
//!     }
//!     Ok(())
//! });
//! let cache = Cache::new(loader, CacheConfig::from_env())?;
//! let values = cache.get(["a".to_string()], 30, 300).await?;
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{
    loader_fn, BatchLoader, Cache, CacheAdmin, CacheEntry, CacheStats, LoadBatch, LoadContext,
    LoadOrigin,
};
pub use clock::Clock;
pub use config::CacheConfig;
pub use error::{CacheError, Result};
