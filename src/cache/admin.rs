//! Admin Module
//!
//! Read-mostly management surface over a running cache.

use crate::cache::CacheStats;

/// Counters and controls exposed to operators.
///
/// Object safe, so a management endpoint can hold caches of different key
/// and value types as `Arc<dyn CacheAdmin>`.
pub trait CacheAdmin: Send + Sync {
    fn hits(&self) -> u64;

    fn misses(&self) -> u64;

    /// Current number of stored entries.
    fn size(&self) -> usize;

    /// Entry limit, `None` when unlimited.
    fn max_size(&self) -> Option<usize>;

    /// Drops every stored entry. Counters are left alone.
    fn clear(&self);

    /// Zeroes the hit and miss counters.
    fn reset_stats(&self);

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits(),
            misses: self.misses(),
            size: self.size(),
            max_size: self.max_size(),
        }
    }
}
