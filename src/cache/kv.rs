//! Key-value cache abstraction shared by the counter store and the detail cache.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure of a cache round-trip.
///
/// Every variant is transient from the engine's point of view: reads fall back
/// to the database and counter increments are dropped.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation `{op}` timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("cache payload could not be decoded: {0}")]
    Codec(String),
}

impl CacheError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Thin surface over an external key-value store.
///
/// String entries carry opaque blobs with a TTL; hash fields carry integer
/// counters. Every operation is a single atomic round-trip on the store.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Overwrite an existing entry while keeping its remaining TTL.
    /// Returns `false` without writing when the key is absent.
    async fn replace_keep_ttl(&self, key: &str, value: &str) -> Result<bool, CacheError>;

    /// Write only when the key is absent. Returns whether the write happened.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete the key only while it still holds `expected`.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<i64>, CacheError>;

    async fn hset(&self, key: &str, field: &str, value: i64) -> Result<(), CacheError>;

    /// Set the field only when it does not exist yet.
    async fn hset_nx(&self, key: &str, field: &str, value: i64) -> Result<bool, CacheError>;

    /// Add `delta` to a field that already exists and return the new value.
    /// Returns `None` and leaves the hash untouched when the field is absent.
    async fn hincr_existing(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<i64>, CacheError>;

    /// Set `field` in `key` only while the hash `guard` holds the same field.
    /// Returns whether the write happened.
    async fn hset_guarded(
        &self,
        key: &str,
        guard: &str,
        field: &str,
        value: i64,
    ) -> Result<bool, CacheError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError>;

    /// Remove `field` from `key` only when the hash `guard` lacks it.
    /// Returns whether a field was removed.
    async fn hdel_unguarded(
        &self,
        key: &str,
        guard: &str,
        field: &str,
    ) -> Result<bool, CacheError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}
