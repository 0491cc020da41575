//! Cache-aside recipe detail reads.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::warn;

use crate::application::counters::CounterService;
use crate::application::repos::{RecipesRepo, RepoError};
use crate::cache::{CacheError, DetailCache};
use crate::domain::recipes::RecipeDetail;
use crate::domain::types::{Metric, RecipeId};

const METRIC_DETAIL_HIT: &str = "recipehub_detail_cache_hit_total";
const METRIC_DETAIL_MISS: &str = "recipehub_detail_cache_miss_total";
const METRIC_CACHE_FALLBACK: &str = "recipehub_cache_fallback_total";

#[derive(Debug, Error)]
pub enum RecipeReadError {
    #[error("recipe {0} not found")]
    NotFound(RecipeId),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct RecipeDetailService {
    recipes: Arc<dyn RecipesRepo>,
    details: DetailCache,
    counters: CounterService,
}

impl RecipeDetailService {
    pub fn new(
        recipes: Arc<dyn RecipesRepo>,
        details: DetailCache,
        counters: CounterService,
    ) -> Self {
        Self {
            recipes,
            details,
            counters,
        }
    }

    /// Serves the detail from the cache, loading and caching it on a miss.
    ///
    /// Every call records one view. The returned counters are the ones read
    /// before that view was applied. Cache failures degrade to the database.
    pub async fn get_recipe_detail(&self, id: RecipeId) -> Result<RecipeDetail, RecipeReadError> {
        match self.details.get(id).await {
            Ok(Some(detail)) => {
                counter!(METRIC_DETAIL_HIT).increment(1);
                self.record_cached_view(&detail).await;
                return Ok(detail);
            }
            Ok(None) => {
                counter!(METRIC_DETAIL_MISS).increment(1);
            }
            Err(err) => cache_fallback("detail_get", id, &err),
        }

        let aggregate = self
            .recipes
            .find_with_aggregates(id)
            .await?
            .ok_or(RecipeReadError::NotFound(id))?;
        let detail = RecipeDetail::from(aggregate);

        match self.details.put(&detail).await {
            Ok(_) => self.record_cached_view(&detail).await,
            Err(err) => {
                cache_fallback("detail_put", id, &err);
                self.counters.bump(Metric::Views, id, 1).await;
            }
        }

        Ok(detail)
    }

    /// Bumps the live view counter and the cached copy, if any.
    pub async fn record_view(&self, id: RecipeId) {
        self.counters.bump(Metric::Views, id, 1).await;

        if let Err(err) = self
            .details
            .mutate_in_place(id, |detail| detail.bump(Metric::Views, 1))
            .await
        {
            cache_fallback("detail_mutate", id, &err);
        }
    }

    /// [`Self::record_view`] for a detail the caller already holds, which
    /// spares the cache a second read.
    async fn record_cached_view(&self, detail: &RecipeDetail) {
        self.counters.bump(Metric::Views, detail.id, 1).await;

        let mut bumped = detail.clone();
        bumped.bump(Metric::Views, 1);
        if let Err(err) = self.details.replace(&bumped).await {
            cache_fallback("detail_mutate", detail.id, &err);
        }
    }
}

fn cache_fallback(op: &'static str, id: RecipeId, err: &CacheError) {
    warn!(
        target = "recipehub::application::recipes",
        recipe_id = id,
        op,
        error = %err,
        "detail cache unavailable; continuing without it"
    );
    counter!(METRIC_CACHE_FALLBACK, "op" => op).increment(1);
}
