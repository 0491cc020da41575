//! Two-plane counter store.
//!
//! Each metric owns a *current* hash, mutated by user actions, and a
//! *committed* hash mirroring what the database last received. Only
//! reconciliation moves the committed plane.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use super::keys::{CounterPlane, counter_field, counter_hash_key, parse_counter_field};
use super::kv::{CacheError, KeyValueCache};
use crate::domain::entities::CounterValues;
use crate::domain::types::{Metric, RecipeId};

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter `{metric}` for recipe {id} was never initialized")]
    UnknownKey { metric: Metric, id: RecipeId },
    #[error("counter `{metric}` for recipe {id} already holds {current}")]
    AlreadyInitialized {
        metric: Metric,
        id: RecipeId,
        current: i64,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    /// The current plane already held the requested value.
    AlreadyPresent,
}

#[derive(Clone)]
pub struct CounterStore {
    kv: Arc<dyn KeyValueCache>,
}

impl CounterStore {
    pub fn new(kv: Arc<dyn KeyValueCache>) -> Self {
        Self { kv }
    }

    /// Seeds both planes with `value`.
    ///
    /// A live current value is never overwritten: the same value reports
    /// [`InitOutcome::AlreadyPresent`], a different one fails with
    /// [`CounterError::AlreadyInitialized`].
    pub async fn initialize(
        &self,
        metric: Metric,
        id: RecipeId,
        value: i64,
    ) -> Result<InitOutcome, CounterError> {
        let field = counter_field(id);
        let current_key = counter_hash_key(metric, CounterPlane::Current);

        if !self.kv.hset_nx(&current_key, &field, value).await? {
            let current = self.kv.hget(&current_key, &field).await?;
            return match current {
                Some(current) if current == value => Ok(InitOutcome::AlreadyPresent),
                Some(current) => Err(CounterError::AlreadyInitialized {
                    metric,
                    id,
                    current,
                }),
                // Deleted between the two round-trips.
                None => Err(CounterError::UnknownKey { metric, id }),
            };
        }

        self.kv
            .hset(
                &counter_hash_key(metric, CounterPlane::Committed),
                &field,
                value,
            )
            .await?;
        Ok(InitOutcome::Created)
    }

    /// Seeds every metric from a row snapshot, skipping metrics already live.
    pub async fn initialize_all(
        &self,
        id: RecipeId,
        values: CounterValues,
    ) -> Result<Vec<(Metric, InitOutcome)>, CounterError> {
        let mut outcomes = Vec::with_capacity(Metric::ALL.len());
        for metric in Metric::ALL {
            match self.initialize(metric, id, values.get(metric)).await {
                Ok(outcome) => outcomes.push((metric, outcome)),
                Err(CounterError::AlreadyInitialized { current, .. }) => {
                    warn!(
                        target = "recipehub::cache::counters",
                        recipe_id = id,
                        metric = %metric,
                        current,
                        requested = values.get(metric),
                        "counter already live; keeping current value"
                    );
                    outcomes.push((metric, InitOutcome::AlreadyPresent));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(outcomes)
    }

    /// Atomically adds `delta` to the current plane and returns the new value.
    pub async fn increment(
        &self,
        metric: Metric,
        id: RecipeId,
        delta: i64,
    ) -> Result<i64, CounterError> {
        self.kv
            .hincr_existing(
                &counter_hash_key(metric, CounterPlane::Current),
                &counter_field(id),
                delta,
            )
            .await?
            .ok_or(CounterError::UnknownKey { metric, id })
    }

    pub async fn read_current(
        &self,
        metric: Metric,
        id: RecipeId,
    ) -> Result<Option<i64>, CounterError> {
        self.read(metric, CounterPlane::Current, id).await
    }

    pub async fn read_committed(
        &self,
        metric: Metric,
        id: RecipeId,
    ) -> Result<Option<i64>, CounterError> {
        self.read(metric, CounterPlane::Committed, id).await
    }

    /// Current values of every metric, `None` when any metric is missing.
    pub async fn read_current_values(
        &self,
        id: RecipeId,
    ) -> Result<Option<CounterValues>, CounterError> {
        let mut values = CounterValues::default();
        for metric in Metric::ALL {
            match self.read_current(metric, id).await? {
                Some(value) => values.set(metric, value),
                None => return Ok(None),
            }
        }
        Ok(Some(values))
    }

    pub async fn read_all_current(
        &self,
        metric: Metric,
    ) -> Result<HashMap<RecipeId, i64>, CounterError> {
        self.read_all(metric, CounterPlane::Current).await
    }

    pub async fn read_all_committed(
        &self,
        metric: Metric,
    ) -> Result<HashMap<RecipeId, i64>, CounterError> {
        self.read_all(metric, CounterPlane::Committed).await
    }

    /// Advances the committed plane while the current field still exists.
    /// Returns `false` without writing once the entry has been deleted.
    pub async fn commit(
        &self,
        metric: Metric,
        id: RecipeId,
        value: i64,
    ) -> Result<bool, CounterError> {
        Ok(self
            .kv
            .hset_guarded(
                &counter_hash_key(metric, CounterPlane::Committed),
                &counter_hash_key(metric, CounterPlane::Current),
                &counter_field(id),
                value,
            )
            .await?)
    }

    /// Puts the committed plane back to a value observed before a commit.
    /// `None` removes the field so the next diff treats the id as new. A
    /// deleted entry stays deleted.
    pub async fn restore_committed(
        &self,
        metric: Metric,
        id: RecipeId,
        previous: Option<i64>,
    ) -> Result<(), CounterError> {
        match previous {
            Some(value) => {
                self.commit(metric, id, value).await?;
            }
            None => {
                self.kv
                    .hdel(
                        &counter_hash_key(metric, CounterPlane::Committed),
                        &counter_field(id),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Drops a committed value whose current counterpart is gone.
    pub async fn prune_committed(
        &self,
        metric: Metric,
        id: RecipeId,
    ) -> Result<bool, CounterError> {
        Ok(self
            .kv
            .hdel_unguarded(
                &counter_hash_key(metric, CounterPlane::Committed),
                &counter_hash_key(metric, CounterPlane::Current),
                &counter_field(id),
            )
            .await?)
    }

    /// Removes both planes of every metric for `id`.
    pub async fn delete_all(&self, id: RecipeId) -> Result<(), CounterError> {
        let field = counter_field(id);
        for metric in Metric::ALL {
            for plane in [CounterPlane::Current, CounterPlane::Committed] {
                self.kv
                    .hdel(&counter_hash_key(metric, plane), &field)
                    .await?;
            }
        }
        Ok(())
    }

    async fn read(
        &self,
        metric: Metric,
        plane: CounterPlane,
        id: RecipeId,
    ) -> Result<Option<i64>, CounterError> {
        Ok(self
            .kv
            .hget(&counter_hash_key(metric, plane), &counter_field(id))
            .await?)
    }

    async fn read_all(
        &self,
        metric: Metric,
        plane: CounterPlane,
    ) -> Result<HashMap<RecipeId, i64>, CounterError> {
        let raw = self.kv.hgetall(&counter_hash_key(metric, plane)).await?;
        let mut values = HashMap::with_capacity(raw.len());
        for (field, value) in raw {
            match parse_counter_field(&field) {
                Some(id) => {
                    values.insert(id, value);
                }
                None => warn!(
                    target = "recipehub::cache::counters",
                    metric = %metric,
                    plane = plane.as_str(),
                    field = %field,
                    "ignoring non-numeric counter field"
                ),
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;

    fn store() -> CounterStore {
        CounterStore::new(Arc::new(MemoryCache::default()))
    }

    #[tokio::test]
    async fn initialize_sets_both_planes() {
        let store = store();

        let outcome = store.initialize(Metric::Views, 1, 10).await.expect("init");

        assert_eq!(outcome, InitOutcome::Created);
        assert_eq!(store.read_current(Metric::Views, 1).await.expect("cur"), Some(10));
        assert_eq!(
            store.read_committed(Metric::Views, 1).await.expect("committed"),
            Some(10)
        );
    }

    #[tokio::test]
    async fn initialize_is_idempotent_for_same_value() {
        let store = store();
        store.initialize(Metric::Likes, 1, 3).await.expect("first");

        let outcome = store.initialize(Metric::Likes, 1, 3).await.expect("second");
        assert_eq!(outcome, InitOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn initialize_never_clobbers_live_counter() {
        let store = store();
        store.initialize(Metric::Likes, 1, 0).await.expect("init");
        store.increment(Metric::Likes, 1, 4).await.expect("incr");

        let err = store
            .initialize(Metric::Likes, 1, 0)
            .await
            .expect_err("must refuse");
        assert!(matches!(
            err,
            CounterError::AlreadyInitialized { current: 4, .. }
        ));
        assert_eq!(store.read_current(Metric::Likes, 1).await.expect("cur"), Some(4));
        assert_eq!(
            store.read_committed(Metric::Likes, 1).await.expect("committed"),
            Some(0)
        );
    }

    #[tokio::test]
    async fn increment_requires_initialized_key() {
        let store = store();

        let err = store
            .increment(Metric::SaveCount, 9, 1)
            .await
            .expect_err("unknown key");
        assert!(matches!(
            err,
            CounterError::UnknownKey {
                metric: Metric::SaveCount,
                id: 9
            }
        ));
        assert_eq!(store.read_current(Metric::SaveCount, 9).await.expect("cur"), None);
    }

    #[tokio::test]
    async fn increments_only_touch_current_plane() {
        let store = store();
        store.initialize(Metric::Views, 2, 5).await.expect("init");

        for delta in [1, 1, -1, 3] {
            store.increment(Metric::Views, 2, delta).await.expect("incr");
        }

        assert_eq!(store.read_current(Metric::Views, 2).await.expect("cur"), Some(9));
        assert_eq!(
            store.read_committed(Metric::Views, 2).await.expect("committed"),
            Some(5)
        );
    }

    #[tokio::test]
    async fn restore_committed_none_removes_field() {
        let store = store();
        store.initialize(Metric::Views, 3, 1).await.expect("init");
        assert!(store.commit(Metric::Views, 3, 7).await.expect("commit"));

        store
            .restore_committed(Metric::Views, 3, None)
            .await
            .expect("restore");

        assert!(
            store
                .read_all_committed(Metric::Views)
                .await
                .expect("all")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn commit_and_restore_skip_deleted_entries() {
        let store = store();
        store.initialize(Metric::Likes, 8, 2).await.expect("init");
        store.delete_all(8).await.expect("delete");

        assert!(!store.commit(Metric::Likes, 8, 5).await.expect("commit"));
        store
            .restore_committed(Metric::Likes, 8, Some(2))
            .await
            .expect("restore");

        assert_eq!(store.read_committed(Metric::Likes, 8).await.expect("committed"), None);
    }

    #[tokio::test]
    async fn prune_only_drops_orphaned_committed_values() {
        let store = store();
        store.initialize(Metric::Views, 1, 4).await.expect("init");
        store.initialize(Metric::Views, 2, 6).await.expect("init");
        store
            .kv
            .hdel(&counter_hash_key(Metric::Views, CounterPlane::Current), "2")
            .await
            .expect("orphan");

        assert!(!store.prune_committed(Metric::Views, 1).await.expect("live"));
        assert!(store.prune_committed(Metric::Views, 2).await.expect("orphan"));
        assert_eq!(
            store.read_all_committed(Metric::Views).await.expect("all"),
            HashMap::from([(1, 4)])
        );
    }

    #[tokio::test]
    async fn delete_all_clears_every_metric_and_plane() {
        let store = store();
        store
            .initialize_all(
                4,
                CounterValues {
                    views: 1,
                    likes: 2,
                    save_count: 3,
                },
            )
            .await
            .expect("init");
        store.initialize(Metric::Views, 5, 1).await.expect("other");

        store.delete_all(4).await.expect("delete");

        for metric in Metric::ALL {
            assert_eq!(store.read_current(metric, 4).await.expect("cur"), None);
            assert_eq!(store.read_committed(metric, 4).await.expect("committed"), None);
        }
        assert_eq!(store.read_current(Metric::Views, 5).await.expect("cur"), Some(1));
    }

    #[tokio::test]
    async fn read_all_skips_foreign_fields() {
        let kv = Arc::new(MemoryCache::default());
        let store = CounterStore::new(kv.clone());
        store.initialize(Metric::Views, 1, 2).await.expect("init");
        kv.hset(
            &counter_hash_key(Metric::Views, CounterPlane::Current),
            "garbage",
            5,
        )
        .await
        .expect("seed");

        let all = store.read_all_current(Metric::Views).await.expect("all");
        assert_eq!(all, HashMap::from([(1, 2)]));
    }
}
