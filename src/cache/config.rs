//! Cache configuration.
//!
//! Controls the detail TTL window and the in-memory backend bound via the
//! `[cache]` section of `recipehub.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::detail::TtlWindow;

// Default values for cache configuration
const DEFAULT_DETAIL_TTL_MIN_SECS: u64 = 1500;
const DEFAULT_DETAIL_TTL_MAX_SECS: u64 = 1800;
const DEFAULT_MEMORY_DETAIL_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lower bound of the randomized detail TTL.
    pub detail_ttl_min_secs: u64,
    /// Upper bound of the randomized detail TTL.
    pub detail_ttl_max_secs: u64,
    /// Maximum detail entries held by the in-memory backend.
    pub memory_detail_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            detail_ttl_min_secs: DEFAULT_DETAIL_TTL_MIN_SECS,
            detail_ttl_max_secs: DEFAULT_DETAIL_TTL_MAX_SECS,
            memory_detail_limit: DEFAULT_MEMORY_DETAIL_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            detail_ttl_min_secs: settings.detail_ttl_min.as_secs(),
            detail_ttl_max_secs: settings.detail_ttl_max.as_secs(),
            memory_detail_limit: settings.memory_detail_limit.get(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_window(&self) -> TtlWindow {
        TtlWindow::new(
            Duration::from_secs(self.detail_ttl_min_secs),
            Duration::from_secs(self.detail_ttl_max_secs),
        )
    }

    /// Returns the memory detail limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_detail_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_detail_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
