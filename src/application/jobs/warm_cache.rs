//! Periodic detail cache refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use apalis::prelude::{Data, Error as ApalisError};
use metrics::histogram;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::repos::{RecipesRepo, RepoError};
use crate::cache::{CacheError, CounterStore, DetailCache};
use crate::domain::recipes::RecipeDetail;

use super::context::{JobWorkerContext, job_failed};

const METRIC_WARM_MS: &str = "recipehub_warm_ms";

#[derive(Debug, Error)]
pub enum WarmError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub loaded: usize,
    /// Entries whose counters were taken from the live counter plane.
    pub overlaid: usize,
}

pub struct DetailCacheWarmer {
    recipes: Arc<dyn RecipesRepo>,
    details: DetailCache,
    counters: CounterStore,
    top_n: Option<u32>,
    load_timeout: Duration,
}

impl DetailCacheWarmer {
    /// `top_n` of `None` warms every recipe.
    pub fn new(
        recipes: Arc<dyn RecipesRepo>,
        details: DetailCache,
        counters: CounterStore,
        top_n: Option<u32>,
        load_timeout: Duration,
    ) -> Self {
        Self {
            recipes,
            details,
            counters,
            top_n,
            load_timeout,
        }
    }

    /// Reloads the most viewed recipes and re-caches each with a fresh TTL.
    ///
    /// Counter fields come from the current plane when it is initialized, since
    /// the row lags it by up to one reconciliation interval.
    pub async fn warm(&self) -> Result<WarmReport, WarmError> {
        let started_at = Instant::now();

        let aggregates = tokio::time::timeout(
            self.load_timeout,
            self.recipes.list_top_by_views(self.top_n),
        )
        .await
        .unwrap_or(Err(RepoError::Timeout))?;

        let mut report = WarmReport {
            loaded: aggregates.len(),
            ..Default::default()
        };

        for aggregate in aggregates {
            let mut detail = RecipeDetail::from(aggregate);
            match self.counters.read_current_values(detail.id).await {
                Ok(Some(values)) => {
                    detail.views = values.views;
                    detail.likes = values.likes;
                    detail.save_count = values.save_count;
                    report.overlaid += 1;
                }
                Ok(None) => {}
                Err(err) => warn!(
                    target = "recipehub::application::jobs::warm_cache",
                    recipe_id = detail.id,
                    error = %err,
                    "could not read live counters; caching row values"
                ),
            }
            self.details.put(&detail).await?;
        }

        histogram!(METRIC_WARM_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            target = "recipehub::application::jobs::warm_cache",
            loaded = report.loaded,
            overlaid = report.overlaid,
            "detail cache warmed"
        );
        Ok(report)
    }
}

/// Cron tick for the warm worker.
#[derive(Default, Debug, Clone)]
pub struct WarmDetailCacheJob;

impl From<chrono::DateTime<chrono::Utc>> for WarmDetailCacheJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

pub async fn process_warm_job(
    _job: WarmDetailCacheJob,
    ctx: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    ctx.warmer.warm().await.map(|_| ()).map_err(job_failed)
}
