//! Cache Module
//!
//! Provides the loading cache: single-flight miss loads, refresh-ahead,
//! TTL expiration and LRU eviction.

mod admin;
pub(crate) mod engine;
mod entry;
mod flight;
mod loader;
pub(crate) mod refresh;
mod stats;
mod store;


use std::fmt::Debug;
use std::hash::Hash;

// Re-export public types
pub use admin::CacheAdmin;
pub use engine::Cache;
pub use entry::CacheEntry;
pub use loader::{loader_fn, BatchLoader, LoadBatch, LoadContext, LoadOrigin, LoaderFn};
pub use stats::CacheStats;
pub use store::{CacheStore, SweepReport};

/// Bounds every cache key satisfies.
pub trait CacheKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Bounds every cached value satisfies. Wrap large values in an `Arc`.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}
