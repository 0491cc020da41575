//! Expiring single-owner lease stored in the cache.

use std::sync::Arc;
use std::time::Duration;

use super::kv::{CacheError, KeyValueCache};

pub struct CacheLease {
    kv: Arc<dyn KeyValueCache>,
    key: String,
    token: String,
}

impl CacheLease {
    /// Takes the lease unless another owner holds a live one.
    pub async fn try_acquire(
        kv: Arc<dyn KeyValueCache>,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<Self>, CacheError> {
        let token = format!("{}-{:016x}", std::process::id(), rand::random::<u64>());
        if !kv.set_nx_ex(key, &token, ttl).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            kv,
            key: key.to_string(),
            token,
        }))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Releases the lease if it was not taken over after expiring.
    pub async fn release(self) -> Result<bool, CacheError> {
        self.kv.delete_if_eq(&self.key, &self.token).await
    }
}
