//! Error types for the loading cache
//!
//! Provides unified error handling using thiserror.

use std::error::Error as StdError;
use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

/// Loader failure shared between every caller coalesced onto the same batch.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

// == Cache Error Enum ==
/// Unified error type for the loading cache.
///
/// Cloneable so that a single loader failure can be handed to every waiter
/// of a coalesced load unchanged.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The loader failed during a synchronous miss-load
    #[error("Load failed for keys [{keys}]: {source}")]
    LoadFailed {
        keys: String,
        #[source]
        source: SharedError,
    },

    /// The caller that owned an in-flight load went away before finishing it
    #[error("Load abandoned for key {key}")]
    LoadAbandoned { key: String },

    /// Rejected configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wraps a loader error, naming the batch of keys it was loading.
    pub fn load_failed<'a, K>(keys: impl IntoIterator<Item = &'a K>, source: anyhow::Error) -> Self
    where
        K: Debug + 'a,
    {
        let keys = keys
            .into_iter()
            .map(|key| format!("{key:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        let source: Box<dyn StdError + Send + Sync + 'static> = source.into();

        CacheError::LoadFailed {
            keys,
            source: Arc::from(source),
        }
    }

    /// Builds the error handed to waiters whose load owner disappeared.
    pub fn abandoned<K: Debug>(key: &K) -> Self {
        CacheError::LoadAbandoned {
            key: format!("{key:?}"),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the loading cache.
pub type Result<T> = std::result::Result<T, CacheError>;
