//! Configuration Module
//!
//! Handles loading and validating cache configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CacheError, Result};

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
/// TTL and entry limits use `<= 0` to mean "unlimited".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store-level TTL in seconds, swept by the maintenance job
    pub ttl_seconds: i64,
    /// Maximum number of entries kept after a maintenance pass
    pub max_entries: i64,
    /// Number of keys handed to the loader per background refresh call
    pub batch_size: usize,
    /// Interval between refresh queue drains, in milliseconds
    pub refresh_drain_period_ms: u64,
    /// Interval between store maintenance passes, in milliseconds
    pub maintenance_period_ms: u64,
    /// Interval between clock updates, in milliseconds
    pub clock_tick_ms: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_TTL_SECONDS` - Store TTL in seconds (default: -1, unlimited)
    /// - `CACHE_MAX_ENTRIES` - Maximum entries (default: -1, unlimited)
    /// - `CACHE_BATCH_SIZE` - Refresh batch size (default: 100)
    /// - `CACHE_REFRESH_DRAIN_PERIOD_MS` - Refresh drain period (default: 1000)
    /// - `CACHE_MAINTENANCE_PERIOD_MS` - Maintenance period (default: 2000)
    /// - `CACHE_CLOCK_TICK_MS` - Clock update period (default: 100)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    ///
    /// Missing or unparsable values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            ttl_seconds: parse_or(&lookup, "CACHE_TTL_SECONDS", defaults.ttl_seconds),
            max_entries: parse_or(&lookup, "CACHE_MAX_ENTRIES", defaults.max_entries),
            batch_size: parse_or(&lookup, "CACHE_BATCH_SIZE", defaults.batch_size),
            refresh_drain_period_ms: parse_or(
                &lookup,
                "CACHE_REFRESH_DRAIN_PERIOD_MS",
                defaults.refresh_drain_period_ms,
            ),
            maintenance_period_ms: parse_or(
                &lookup,
                "CACHE_MAINTENANCE_PERIOD_MS",
                defaults.maintenance_period_ms,
            ),
            clock_tick_ms: parse_or(&lookup, "CACHE_CLOCK_TICK_MS", defaults.clock_tick_ms),
        }
    }

    /// Rejects values the background jobs cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CacheError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }

        for (name, value) in [
            ("refresh_drain_period_ms", self.refresh_drain_period_ms),
            ("maintenance_period_ms", self.maintenance_period_ms),
            ("clock_tick_ms", self.clock_tick_ms),
        ] {
            if value == 0 {
                return Err(CacheError::InvalidConfig(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn refresh_drain_period(&self) -> Duration {
        Duration::from_millis(self.refresh_drain_period_ms)
    }

    pub fn maintenance_period(&self) -> Duration {
        Duration::from_millis(self.maintenance_period_ms)
    }

    pub fn clock_tick(&self) -> Duration {
        Duration::from_millis(self.clock_tick_ms)
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: -1,
            max_entries: -1,
            batch_size: 100,
            refresh_drain_period_ms: 1000,
            maintenance_period_ms: 2000,
            clock_tick_ms: 100,
        }
    }
}
