//! Per-recipe detail blobs with a jittered TTL.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::keys::detail_key;
use super::kv::{CacheError, KeyValueCache};
use crate::domain::recipes::RecipeDetail;
use crate::domain::types::RecipeId;

const MIN_TTL: Duration = Duration::from_secs(1);

/// Inclusive window the detail TTL is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlWindow {
    min: Duration,
    max: Duration,
}

impl TtlWindow {
    /// Bounds are reordered when given backwards and never drop below one second.
    pub fn new(min: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min: min.max(MIN_TTL),
            max: max.max(MIN_TTL),
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Uniform draw in whole seconds.
    pub fn sample(&self) -> Duration {
        let secs = rand::thread_rng().gen_range(self.min.as_secs()..=self.max.as_secs());
        Duration::from_secs(secs)
    }
}

#[derive(Clone)]
pub struct DetailCache {
    kv: Arc<dyn KeyValueCache>,
    ttl: TtlWindow,
}

impl DetailCache {
    pub fn new(kv: Arc<dyn KeyValueCache>, ttl: TtlWindow) -> Self {
        Self { kv, ttl }
    }

    pub fn ttl_window(&self) -> TtlWindow {
        self.ttl
    }

    /// Entries that fail to decode or carry another schema version are evicted
    /// and reported as a miss.
    pub async fn get(&self, id: RecipeId) -> Result<Option<RecipeDetail>, CacheError> {
        let key = detail_key(id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<RecipeDetail>(&raw) {
            Ok(detail) if detail.is_current_schema() && detail.id == id => Ok(Some(detail)),
            Ok(detail) => {
                debug!(
                    target = "recipehub::cache::detail",
                    recipe_id = id,
                    schema_version = detail.schema_version,
                    "evicting detail entry with foreign schema"
                );
                self.kv.delete(&key).await?;
                Ok(None)
            }
            Err(err) => {
                warn!(
                    target = "recipehub::cache::detail",
                    recipe_id = id,
                    error = %err,
                    "evicting undecodable detail entry"
                );
                self.kv.delete(&key).await?;
                Ok(None)
            }
        }
    }

    /// Stores the detail with a fresh TTL drawn from the window and returns it.
    pub async fn put(&self, detail: &RecipeDetail) -> Result<Duration, CacheError> {
        let ttl = self.ttl.sample();
        self.put_with_ttl(detail, ttl).await?;
        Ok(ttl)
    }

    pub async fn put_with_ttl(
        &self,
        detail: &RecipeDetail,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let body = serde_json::to_string(detail).map_err(CacheError::codec)?;
        self.kv.set_ex(&detail_key(detail.id), &body, ttl).await
    }

    pub async fn delete(&self, id: RecipeId) -> Result<(), CacheError> {
        self.kv.delete(&detail_key(id)).await
    }

    /// Overwrites a cached entry while keeping its remaining TTL.
    ///
    /// Returns `false` without writing when nothing is cached for the id.
    pub async fn replace(&self, detail: &RecipeDetail) -> Result<bool, CacheError> {
        let body = serde_json::to_string(detail).map_err(CacheError::codec)?;
        self.kv.replace_keep_ttl(&detail_key(detail.id), &body).await
    }

    /// Read-modify-write of a cached entry that keeps its remaining TTL.
    ///
    /// Returns `false` when nothing was cached for `id`. The read and the write
    /// are separate round-trips, so a concurrent writer can be overwritten;
    /// the blob is a snapshot and the counter store stays authoritative.
    pub async fn mutate_in_place<F>(&self, id: RecipeId, mutate: F) -> Result<bool, CacheError>
    where
        F: FnOnce(&mut RecipeDetail) + Send,
    {
        let Some(mut detail) = self.get(id).await? else {
            return Ok(false);
        };
        mutate(&mut detail);
        self.replace(&detail).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use time::macros::datetime;

    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::domain::recipes::DETAIL_SCHEMA_VERSION;

    fn sample_detail(id: RecipeId) -> RecipeDetail {
        RecipeDetail {
            schema_version: DETAIL_SCHEMA_VERSION,
            id,
            author_id: 1,
            title: "Miso soup".to_string(),
            description: "Dashi and miso".to_string(),
            cost_time: 10,
            created_at: datetime!(2024-01-01 08:00 UTC),
            ingredients: vec!["miso".to_string()],
            tags: vec!["soup".to_string()],
            photos: Vec::new(),
            steps: Vec::new(),
            views: 5,
            likes: 2,
            save_count: 0,
            average_rating: None,
            comment_count: 0,
            recent_comments: Vec::new(),
        }
    }

    fn detail_cache() -> (Arc<MemoryCache>, DetailCache) {
        let kv = Arc::new(MemoryCache::default());
        let window = TtlWindow::new(Duration::from_secs(1500), Duration::from_secs(1800));
        (kv.clone(), DetailCache::new(kv, window))
    }

    #[test]
    fn window_reorders_and_clamps_bounds() {
        let window = TtlWindow::new(Duration::from_secs(30), Duration::ZERO);
        assert_eq!(window.min(), Duration::from_secs(1));
        assert_eq!(window.max(), Duration::from_secs(30));
    }

    #[test]
    fn sampled_ttls_stay_in_window_and_vary() {
        let window = TtlWindow::new(Duration::from_secs(1500), Duration::from_secs(1800));
        let samples: HashSet<Duration> = (0..200).map(|_| window.sample()).collect();

        assert!(samples.len() > 1, "ttl must not be constant");
        assert!(
            samples
                .iter()
                .all(|ttl| *ttl >= window.min() && *ttl <= window.max())
        );
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (kv, cache) = detail_cache();
        let detail = sample_detail(3);

        let ttl = cache.put(&detail).await.expect("put");
        assert!(ttl >= Duration::from_secs(1500) && ttl <= Duration::from_secs(1800));
        assert!(kv.ttl(&detail_key(3)).is_some());
        assert_eq!(cache.get(3).await.expect("get"), Some(detail));
    }

    #[tokio::test]
    async fn foreign_schema_is_evicted() {
        let (kv, cache) = detail_cache();
        let mut detail = sample_detail(4);
        detail.schema_version = DETAIL_SCHEMA_VERSION + 1;
        let body = serde_json::to_string(&detail).expect("serialize");
        kv.set_ex(&detail_key(4), &body, Duration::from_secs(60))
            .await
            .expect("seed");

        assert_eq!(cache.get(4).await.expect("get"), None);
        assert_eq!(kv.get(&detail_key(4)).await.expect("raw get"), None);
    }

    #[tokio::test]
    async fn garbage_body_is_evicted() {
        let (kv, cache) = detail_cache();
        kv.set_ex(&detail_key(5), "{not json", Duration::from_secs(60))
            .await
            .expect("seed");

        assert_eq!(cache.get(5).await.expect("get"), None);
        assert_eq!(kv.get(&detail_key(5)).await.expect("raw get"), None);
    }

    #[tokio::test]
    async fn replace_never_creates_entries() {
        let (kv, cache) = detail_cache();

        assert!(!cache.replace(&sample_detail(7)).await.expect("replace missing"));
        assert_eq!(kv.get(&detail_key(7)).await.expect("raw get"), None);
    }

    #[tokio::test]
    async fn mutate_in_place_keeps_ttl_and_skips_missing() {
        tokio::time::pause();
        let (kv, cache) = detail_cache();

        assert!(
            !cache
                .mutate_in_place(6, |detail| detail.views += 1)
                .await
                .expect("mutate missing")
        );

        cache
            .put_with_ttl(&sample_detail(6), Duration::from_secs(100))
            .await
            .expect("put");
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(
            cache
                .mutate_in_place(6, |detail| detail.views += 1)
                .await
                .expect("mutate")
        );
        let cached = cache.get(6).await.expect("get").expect("still cached");
        assert_eq!(cached.views, 6);
        assert_eq!(kv.ttl(&detail_key(6)), Some(Duration::from_secs(90)));
    }
}
