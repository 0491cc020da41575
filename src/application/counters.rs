//! Counter entry lifecycle and best-effort counter mutations.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::repos::{RecipesRepo, RepoError};
use crate::cache::{CacheError, CounterError, CounterStore, DetailCache, InitOutcome};
use crate::domain::entities::CounterValues;
use crate::domain::types::{CounterPolicy, Metric, RecipeId};

const METRIC_INCREMENT_FAILED: &str = "recipehub_counter_increment_failed_total";

#[derive(Debug, Error)]
pub enum CounterEntryError {
    #[error("counter `{metric}` cannot start at {value}")]
    Negative { metric: Metric, value: i64 },
    #[error("recipe {0} not found")]
    RecipeNotFound(RecipeId),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Counter(#[from] CounterError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Clone)]
pub struct CounterService {
    store: CounterStore,
    details: DetailCache,
    recipes: Arc<dyn RecipesRepo>,
    policy: CounterPolicy,
}

impl CounterService {
    pub fn new(
        store: CounterStore,
        details: DetailCache,
        recipes: Arc<dyn RecipesRepo>,
        policy: CounterPolicy,
    ) -> Self {
        Self {
            store,
            details,
            recipes,
            policy,
        }
    }

    /// Applies `delta` to the current plane, never failing the caller.
    ///
    /// Returns the new value, or `None` when the increment was dropped.
    pub async fn bump(&self, metric: Metric, id: RecipeId, delta: i64) -> Option<i64> {
        match self.store.increment(metric, id, delta).await {
            Ok(value) => Some(value),
            Err(CounterError::UnknownKey { .. }) if self.policy == CounterPolicy::AutoInitialize => {
                self.seed_and_retry(metric, id, delta).await
            }
            Err(err) => {
                record_dropped(metric, id, &err);
                None
            }
        }
    }

    async fn seed_and_retry(&self, metric: Metric, id: RecipeId, delta: i64) -> Option<i64> {
        let record = match self.recipes.find_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(
                    target = "recipehub::application::counters",
                    recipe_id = id,
                    metric = %metric,
                    "skipping counter seed for missing recipe"
                );
                return None;
            }
            Err(err) => {
                warn!(
                    target = "recipehub::application::counters",
                    recipe_id = id,
                    metric = %metric,
                    error = %err,
                    "failed to load recipe row for counter seed"
                );
                counter!(METRIC_INCREMENT_FAILED, "metric" => metric.as_str(), "reason" => "seed")
                    .increment(1);
                return None;
            }
        };

        if let Err(err) = self.store.initialize_all(id, record.counters).await {
            record_dropped(metric, id, &err);
            return None;
        }

        match self.store.increment(metric, id, delta).await {
            Ok(value) => Some(value),
            Err(err) => {
                record_dropped(metric, id, &err);
                None
            }
        }
    }

    /// Seeds every metric of a freshly created recipe.
    ///
    /// Values must be non-negative and the recipe row must exist.
    pub async fn create_entry(
        &self,
        id: RecipeId,
        values: CounterValues,
    ) -> Result<Vec<(Metric, InitOutcome)>, CounterEntryError> {
        if let Some(metric) = Metric::ALL.into_iter().find(|m| values.get(*m) < 0) {
            return Err(CounterEntryError::Negative {
                metric,
                value: values.get(metric),
            });
        }
        if self.recipes.find_by_id(id).await?.is_none() {
            return Err(CounterEntryError::RecipeNotFound(id));
        }

        let outcomes = self.store.initialize_all(id, values).await?;
        info!(
            target = "recipehub::application::counters",
            recipe_id = id,
            "counter entry created"
        );
        Ok(outcomes)
    }

    /// Drops every counter plane and the cached detail of a deleted recipe.
    pub async fn delete_entry(&self, id: RecipeId) -> Result<(), CounterEntryError> {
        self.store.delete_all(id).await?;
        self.details.delete(id).await?;
        info!(
            target = "recipehub::application::counters",
            recipe_id = id,
            "counter entry deleted"
        );
        Ok(())
    }
}

fn record_dropped(metric: Metric, id: RecipeId, err: &CounterError) {
    let reason = match err {
        CounterError::UnknownKey { .. } => "unknown_key",
        CounterError::AlreadyInitialized { .. } => "already_initialized",
        CounterError::Cache(_) => "cache",
    };
    warn!(
        target = "recipehub::application::counters",
        recipe_id = id,
        metric = %metric,
        reason,
        error = %err,
        "dropping counter increment"
    );
    counter!(METRIC_INCREMENT_FAILED, "metric" => metric.as_str(), "reason" => reason)
        .increment(1);
}

