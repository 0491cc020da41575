//! Shared fixtures for the integration tests: in-memory repositories with
//! failure injection and a harness wiring the services over `MemoryCache`.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use recipehub::application::counters::CounterService;
use recipehub::application::engagement::EngagementService;
use recipehub::application::jobs::{
    CounterBootstrapper, CounterReconciler, DetailCacheWarmer, ReconcileConfig,
};
use recipehub::application::recipes::RecipeDetailService;
use recipehub::application::repos::{CounterUpdate, EngagementRepo, RecipesRepo, RepoError};
use recipehub::cache::{
    CacheConfig, CacheError, CounterStore, DetailCache, KeyValueCache, MemoryCache,
};
use recipehub::domain::entities::{
    CounterSnapshot, CounterValues, RecipeAggregate, RecipeCommentRecord, RecipeRecord,
};
use recipehub::domain::types::{
    CounterPolicy, Metric, RecipeId, SaveTarget, ToggleOutcome, UserId,
};
use time::macros::datetime;

pub fn recipe(id: RecipeId, views: i64, likes: i64, save_count: i64) -> RecipeAggregate {
    RecipeAggregate {
        recipe: RecipeRecord {
            id,
            author_id: 7,
            title: format!("Recipe {id}"),
            description: "Slow braised and worth it.".to_string(),
            cost_time: 45,
            created_at: datetime!(2024-06-01 12:00 UTC),
            counters: CounterValues {
                views,
                likes,
                save_count,
            },
        },
        ingredients: vec!["onion".to_string(), "garlic".to_string()],
        tags: vec!["dinner".to_string()],
        photos: Vec::new(),
        steps: Vec::new(),
        average_rating: Some(4.5),
        comment_count: 1,
        recent_comments: vec![RecipeCommentRecord {
            id: 1,
            user_id: 9,
            body: "Lovely.".to_string(),
            rating: Some(5),
            created_at: datetime!(2024-06-02 08:30 UTC),
        }],
    }
}

/// Recipe rows kept in a map. Bulk writes can be told to fail.
#[derive(Default)]
pub struct StubRecipes {
    rows: Mutex<BTreeMap<RecipeId, RecipeAggregate>>,
    failing_writes: AtomicUsize,
    writes: Mutex<Vec<Vec<CounterUpdate>>>,
    aggregate_loads: AtomicUsize,
    view_during_write: Mutex<Option<(CounterStore, RecipeId)>>,
    delete_during_write: Mutex<Option<(CounterStore, RecipeId)>>,
}

impl StubRecipes {
    pub fn with(rows: impl IntoIterator<Item = RecipeAggregate>) -> Self {
        let stub = Self::default();
        for row in rows {
            stub.insert(row);
        }
        stub
    }

    pub fn insert(&self, row: RecipeAggregate) {
        self.rows
            .lock()
            .unwrap()
            .insert(row.recipe.id, row);
    }

    pub fn counters(&self, id: RecipeId) -> Option<CounterValues> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .map(|row| row.recipe.counters)
    }

    /// The next `count` bulk writes fail with a persistence error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// The next bulk write records one view of `id` before touching the rows,
    /// as a request landing mid-cycle would.
    pub fn view_during_next_write(&self, store: CounterStore, id: RecipeId) {
        *self.view_during_write.lock().unwrap() = Some((store, id));
    }

    /// The next bulk write removes every counter of `id` first, as a recipe
    /// deleted mid-cycle would.
    pub fn delete_during_next_write(&self, store: CounterStore, id: RecipeId) {
        *self.delete_during_write.lock().unwrap() = Some((store, id));
    }

    pub fn writes(&self) -> Vec<Vec<CounterUpdate>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn aggregate_loads(&self) -> usize {
        self.aggregate_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecipesRepo for StubRecipes {
    async fn find_by_id(&self, id: RecipeId) -> Result<Option<RecipeRecord>, RepoError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&id)
            .map(|row| row.recipe.clone()))
    }

    async fn find_with_aggregates(
        &self,
        id: RecipeId,
    ) -> Result<Option<RecipeAggregate>, RepoError> {
        self.aggregate_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn list_top_by_views(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<RecipeAggregate>, RepoError> {
        let mut rows: Vec<RecipeAggregate> = self.rows.lock().unwrap().values().cloned().collect();
        rows.sort_by(|a, b| {
            b.recipe
                .counters
                .views
                .cmp(&a.recipe.counters.views)
                .then(a.recipe.id.cmp(&b.recipe.id))
        });
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn list_counters(&self) -> Result<Vec<CounterSnapshot>, RepoError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .map(|row| CounterSnapshot {
                id: row.recipe.id,
                values: row.recipe.counters,
            })
            .collect())
    }

    async fn bulk_update_counters(&self, updates: &[CounterUpdate]) -> Result<u64, RepoError> {
        let concurrent = self.view_during_write.lock().unwrap().take();
        if let Some((store, id)) = concurrent {
            store.increment(Metric::Views, id, 1).await.unwrap();
        }
        let deleted = self.delete_during_write.lock().unwrap().take();
        if let Some((store, id)) = deleted {
            store.delete_all(id).await.unwrap();
        }

        let pending = self.failing_writes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_writes.store(pending - 1, Ordering::SeqCst);
            return Err(RepoError::from_persistence("connection reset by peer"));
        }

        self.writes.lock().unwrap().push(updates.to_vec());
        let mut rows = self.rows.lock().unwrap();
        let mut touched = 0;
        for update in updates {
            let Some(row) = rows.get_mut(&update.id) else {
                continue;
            };
            for metric in Metric::ALL {
                if let Some(value) = update.get(metric) {
                    row.recipe.counters.set(metric, value);
                }
            }
            touched += 1;
        }
        Ok(touched)
    }
}

/// Like and save relations held as sets.
#[derive(Default)]
pub struct StubEngagement {
    likes: Mutex<HashSet<(UserId, RecipeId)>>,
    saves: Mutex<HashSet<(UserId, SaveTarget)>>,
    tag_save_counts: Mutex<HashMap<i64, i64>>,
}

impl StubEngagement {
    pub fn with_tag(self, id: i64) -> Self {
        self.tag_save_counts.lock().unwrap().insert(id, 0);
        self
    }

    pub fn tag_save_count(&self, id: i64) -> Option<i64> {
        self.tag_save_counts.lock().unwrap().get(&id).copied()
    }
}

fn flip<T: Eq + std::hash::Hash>(set: &mut HashSet<T>, key: T) -> ToggleOutcome {
    if set.remove(&key) {
        ToggleOutcome::Removed
    } else {
        set.insert(key);
        ToggleOutcome::Added
    }
}

#[async_trait]
impl EngagementRepo for StubEngagement {
    async fn toggle_like(
        &self,
        user: UserId,
        recipe: RecipeId,
    ) -> Result<ToggleOutcome, RepoError> {
        Ok(flip(&mut self.likes.lock().unwrap(), (user, recipe)))
    }

    async fn toggle_save(
        &self,
        user: UserId,
        target: SaveTarget,
    ) -> Result<ToggleOutcome, RepoError> {
        match target {
            SaveTarget::Recipe(_) => Ok(flip(&mut self.saves.lock().unwrap(), (user, target))),
            SaveTarget::Tag(id) => {
                let mut counts = self.tag_save_counts.lock().unwrap();
                let count = counts.get_mut(&id).ok_or(RepoError::NotFound)?;
                let outcome = flip(&mut self.saves.lock().unwrap(), (user, target));
                *count = (*count + outcome.delta()).max(0);
                Ok(outcome)
            }
            SaveTarget::Ingredient(_) => Err(RepoError::NotFound),
        }
    }
}

/// Cache whose every round-trip fails, standing in for an unreachable server.
pub struct DownCache;

#[async_trait]
impl KeyValueCache for DownCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(down())
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(down())
    }

    async fn replace_keep_ttl(&self, _key: &str, _value: &str) -> Result<bool, CacheError> {
        Err(down())
    }

    async fn set_nx_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, CacheError> {
        Err(down())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(down())
    }

    async fn delete_if_eq(&self, _key: &str, _expected: &str) -> Result<bool, CacheError> {
        Err(down())
    }

    async fn hget(&self, _key: &str, _field: &str) -> Result<Option<i64>, CacheError> {
        Err(down())
    }

    async fn hset(&self, _key: &str, _field: &str, _value: i64) -> Result<(), CacheError> {
        Err(down())
    }

    async fn hset_nx(&self, _key: &str, _field: &str, _value: i64) -> Result<bool, CacheError> {
        Err(down())
    }

    async fn hincr_existing(
        &self,
        _key: &str,
        _field: &str,
        _delta: i64,
    ) -> Result<Option<i64>, CacheError> {
        Err(down())
    }

    async fn hset_guarded(
        &self,
        _key: &str,
        _guard: &str,
        _field: &str,
        _value: i64,
    ) -> Result<bool, CacheError> {
        Err(down())
    }

    async fn hdel(&self, _key: &str, _field: &str) -> Result<(), CacheError> {
        Err(down())
    }

    async fn hdel_unguarded(
        &self,
        _key: &str,
        _guard: &str,
        _field: &str,
    ) -> Result<bool, CacheError> {
        Err(down())
    }

    async fn hgetall(&self, _key: &str) -> Result<HashMap<String, i64>, CacheError> {
        Err(down())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(down())
    }
}

fn down() -> CacheError {
    CacheError::unavailable("connection refused")
}

/// `MemoryCache` that counts string reads.
#[derive(Default)]
pub struct CountingCache {
    inner: MemoryCache,
    gets: AtomicUsize,
}

impl CountingCache {
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueCache for CountingCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.inner.set_ex(key, value, ttl).await
    }

    async fn replace_keep_ttl(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        self.inner.replace_keep_ttl(key, value).await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.inner.set_nx_ex(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        self.inner.delete_if_eq(key, expected).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<i64>, CacheError> {
        self.inner.hget(key, field).await
    }

    async fn hset(&self, key: &str, field: &str, value: i64) -> Result<(), CacheError> {
        self.inner.hset(key, field, value).await
    }

    async fn hset_nx(&self, key: &str, field: &str, value: i64) -> Result<bool, CacheError> {
        self.inner.hset_nx(key, field, value).await
    }

    async fn hincr_existing(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<i64>, CacheError> {
        self.inner.hincr_existing(key, field, delta).await
    }

    async fn hset_guarded(
        &self,
        key: &str,
        guard: &str,
        field: &str,
        value: i64,
    ) -> Result<bool, CacheError> {
        self.inner.hset_guarded(key, guard, field, value).await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        self.inner.hdel(key, field).await
    }

    async fn hdel_unguarded(
        &self,
        key: &str,
        guard: &str,
        field: &str,
    ) -> Result<bool, CacheError> {
        self.inner.hdel_unguarded(key, guard, field).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>, CacheError> {
        self.inner.hgetall(key).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.inner.ping().await
    }
}

/// Services wired over one cache and the stub repositories.
pub struct Harness {
    pub kv: Arc<dyn KeyValueCache>,
    pub recipes: Arc<StubRecipes>,
    pub engagement: Arc<StubEngagement>,
    pub store: CounterStore,
    pub details: DetailCache,
    pub counters: CounterService,
    pub reads: RecipeDetailService,
    pub engage: EngagementService,
}

impl Harness {
    pub fn new(rows: impl IntoIterator<Item = RecipeAggregate>) -> Self {
        Self::build(
            Arc::new(MemoryCache::new(&CacheConfig::default())),
            StubRecipes::with(rows),
            StubEngagement::default().with_tag(3),
            CounterPolicy::Strict,
        )
    }

    pub fn build(
        kv: Arc<dyn KeyValueCache>,
        recipes: StubRecipes,
        engagement: StubEngagement,
        policy: CounterPolicy,
    ) -> Self {
        let recipes = Arc::new(recipes);
        let engagement = Arc::new(engagement);
        let recipes_repo: Arc<dyn RecipesRepo> = recipes.clone();
        let engagement_repo: Arc<dyn EngagementRepo> = engagement.clone();

        let store = CounterStore::new(kv.clone());
        let details = DetailCache::new(kv.clone(), CacheConfig::default().ttl_window());
        let counters = CounterService::new(
            store.clone(),
            details.clone(),
            recipes_repo.clone(),
            policy,
        );
        let reads = RecipeDetailService::new(recipes_repo.clone(), details.clone(), counters.clone());
        let engage = EngagementService::new(recipes_repo, engagement_repo, counters.clone());

        Self {
            kv,
            recipes,
            engagement,
            store,
            details,
            counters,
            reads,
            engage,
        }
    }

    pub fn recipes_repo(&self) -> Arc<dyn RecipesRepo> {
        self.recipes.clone()
    }

    pub fn reconciler(&self) -> CounterReconciler {
        self.reconciler_with(ReconcileConfig {
            retry_backoff: Duration::from_millis(1),
            ..ReconcileConfig::default()
        })
    }

    pub fn reconciler_with(&self, config: ReconcileConfig) -> CounterReconciler {
        CounterReconciler::new(self.store.clone(), self.kv.clone(), self.recipes_repo(), config)
    }

    pub fn warmer(&self, top_n: Option<u32>) -> DetailCacheWarmer {
        DetailCacheWarmer::new(
            self.recipes_repo(),
            self.details.clone(),
            self.store.clone(),
            top_n,
            Duration::from_secs(5),
        )
    }

    pub fn bootstrapper(&self) -> CounterBootstrapper {
        CounterBootstrapper::new(self.recipes_repo(), self.store.clone())
    }

    pub async fn bootstrap(&self) {
        self.bootstrapper().run().await.unwrap();
    }

    pub async fn current(&self, metric: Metric, id: RecipeId) -> Option<i64> {
        self.store.read_current(metric, id).await.unwrap()
    }

    pub async fn committed(&self, metric: Metric, id: RecipeId) -> Option<i64> {
        self.store.read_committed(metric, id).await.unwrap()
    }
}
