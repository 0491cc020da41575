//! Write-behind counter reconciliation.
//!
//! One cycle diffs the current plane of every metric against its committed
//! plane, advances the committed plane for every dirty id, then flushes the
//! dirty rows to the database in batches. A batch that still fails after the
//! configured retries has its committed values rolled back, so the next cycle
//! diffs the same ids again. Database writes carry absolute values, which
//! keeps replays harmless. Commits and rollbacks only land while the current
//! field exists, so a deleted entry never regains a committed value.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use apalis::prelude::{Data, Error as ApalisError};
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::application::repos::{CounterUpdate, RecipesRepo, RepoError};
use crate::cache::keys::RECONCILE_LEASE_KEY;
use crate::cache::{CacheError, CacheLease, CounterError, CounterStore, KeyValueCache};
use crate::domain::types::{Metric, RecipeId};

use super::context::{JobWorkerContext, job_failed};

const METRIC_RECONCILE_MS: &str = "recipehub_reconcile_ms";
const METRIC_RECONCILE_DIRTY: &str = "recipehub_reconcile_dirty_total";
const METRIC_RECONCILE_WRITE_FAILED: &str = "recipehub_reconcile_write_failed_total";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Cache(#[from] CounterError),
    #[error("counter write failed for {failed_ids} recipe ids after {attempts} attempts: {source}")]
    WriteFailed {
        failed_ids: usize,
        attempts: u32,
        #[source]
        source: RepoError,
    },
    #[error("another reconciliation run is in progress")]
    AlreadyRunning,
}

impl From<CacheError> for ReconcileError {
    fn from(err: CacheError) -> Self {
        Self::Cache(CounterError::Cache(err))
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub batch_size: NonZeroUsize,
    pub batch_timeout: Duration,
    pub write_attempts: u32,
    pub retry_backoff: Duration,
    pub lease_ttl: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(500).unwrap_or(NonZeroUsize::MIN),
            batch_timeout: Duration::from_secs(30),
            write_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            lease_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub dirty_ids: usize,
    pub batches: usize,
    pub rows_written: u64,
}

/// A committed value replaced during the collect phase.
#[derive(Debug, Clone, Copy)]
struct PriorCommit {
    metric: Metric,
    id: RecipeId,
    previous: Option<i64>,
}

pub struct CounterReconciler {
    store: CounterStore,
    kv: Arc<dyn KeyValueCache>,
    recipes: Arc<dyn RecipesRepo>,
    config: ReconcileConfig,
    running: Mutex<()>,
}

impl CounterReconciler {
    pub fn new(
        store: CounterStore,
        kv: Arc<dyn KeyValueCache>,
        recipes: Arc<dyn RecipesRepo>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            kv,
            recipes,
            config,
            running: Mutex::new(()),
        }
    }

    /// Runs one cycle unless another one holds the in-process lock or the
    /// cache lease.
    pub async fn run(&self) -> Result<ReconcileReport, ReconcileError> {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| ReconcileError::AlreadyRunning)?;
        let lease =
            CacheLease::try_acquire(self.kv.clone(), RECONCILE_LEASE_KEY, self.config.lease_ttl)
                .await?
                .ok_or(ReconcileError::AlreadyRunning)?;

        let started_at = Instant::now();
        let result = self.run_cycle().await;
        histogram!(METRIC_RECONCILE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        match lease.release().await {
            Ok(true) => {}
            Ok(false) => warn!(
                target = "recipehub::application::jobs::reconcile",
                "reconcile lease expired before the cycle finished"
            ),
            Err(err) => warn!(
                target = "recipehub::application::jobs::reconcile",
                error = %err,
                "failed to release reconcile lease"
            ),
        }

        result
    }

    async fn run_cycle(&self) -> Result<ReconcileReport, ReconcileError> {
        let (updates, prior) = self.collect().await?;
        let mut report = ReconcileReport {
            dirty_ids: updates.len(),
            ..Default::default()
        };
        if updates.is_empty() {
            debug!(
                target = "recipehub::application::jobs::reconcile",
                "no dirty counters"
            );
            return Ok(report);
        }
        counter!(METRIC_RECONCILE_DIRTY).increment(updates.len() as u64);

        let mut failure: Option<(usize, RepoError)> = None;
        for batch in updates.chunks(self.config.batch_size.get()) {
            report.batches += 1;
            match self.write_batch(batch).await {
                Ok(rows) => report.rows_written += rows,
                Err(err) => {
                    counter!(METRIC_RECONCILE_WRITE_FAILED).increment(1);
                    error!(
                        target = "recipehub::application::jobs::reconcile",
                        batch_len = batch.len(),
                        attempts = self.config.write_attempts,
                        error = %err,
                        "counter batch write failed; restoring committed plane"
                    );
                    self.restore(batch, &prior).await;
                    let failed = failure.as_ref().map_or(0, |(count, _)| *count) + batch.len();
                    failure = Some((failed, err));
                }
            }
        }

        if let Some((failed_ids, source)) = failure {
            return Err(ReconcileError::WriteFailed {
                failed_ids,
                attempts: self.config.write_attempts.max(1),
                source,
            });
        }

        info!(
            target = "recipehub::application::jobs::reconcile",
            dirty_ids = report.dirty_ids,
            batches = report.batches,
            rows_written = report.rows_written,
            "counters reconciled"
        );
        Ok(report)
    }

    /// Diffs and commits every metric, returning the merged row updates
    /// ordered by id together with the committed values they replaced.
    async fn collect(&self) -> Result<(Vec<CounterUpdate>, Vec<PriorCommit>), ReconcileError> {
        let mut updates: BTreeMap<RecipeId, CounterUpdate> = BTreeMap::new();
        let mut prior = Vec::new();
        let mut committed_by_metric: HashMap<Metric, HashMap<RecipeId, i64>> = HashMap::new();

        for metric in Metric::ALL {
            match self.collect_metric(metric, &mut updates, &mut prior).await {
                Ok(committed) => {
                    committed_by_metric.insert(metric, committed);
                }
                Err(err) => {
                    self.rollback(&prior).await;
                    return Err(err);
                }
            }
        }

        // Metrics that were clean for a dirty id carry their committed value.
        for update in updates.values_mut() {
            for metric in Metric::ALL {
                if update.get(metric).is_some() {
                    continue;
                }
                if let Some(value) = committed_by_metric
                    .get(&metric)
                    .and_then(|committed| committed.get(&update.id))
                {
                    update.set(metric, *value);
                }
            }
        }

        Ok((updates.into_values().collect(), prior))
    }

    async fn collect_metric(
        &self,
        metric: Metric,
        updates: &mut BTreeMap<RecipeId, CounterUpdate>,
        prior: &mut Vec<PriorCommit>,
    ) -> Result<HashMap<RecipeId, i64>, ReconcileError> {
        let current = self.store.read_all_current(metric).await?;
        let mut committed = self.store.read_all_committed(metric).await?;

        // Committed values left behind by a deleted entry.
        let orphaned: Vec<RecipeId> = committed
            .keys()
            .filter(|id| !current.contains_key(*id))
            .copied()
            .collect();
        for id in orphaned {
            committed.remove(&id);
            if self.store.prune_committed(metric, id).await? {
                debug!(
                    target = "recipehub::application::jobs::reconcile",
                    recipe_id = id,
                    metric = %metric,
                    "pruned committed counter of a deleted entry"
                );
            }
        }

        for (id, value) in current {
            let previous = committed.get(&id).copied();
            if previous == Some(value) {
                continue;
            }
            if !self.store.commit(metric, id, value).await? {
                // Deleted since the scan.
                committed.remove(&id);
                continue;
            }
            prior.push(PriorCommit {
                metric,
                id,
                previous,
            });
            committed.insert(id, value);
            updates
                .entry(id)
                .or_insert_with(|| CounterUpdate::new(id))
                .set(metric, value);
        }

        Ok(committed)
    }

    async fn write_batch(&self, batch: &[CounterUpdate]) -> Result<u64, RepoError> {
        let attempts = self.config.write_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = tokio::time::timeout(
                self.config.batch_timeout,
                self.recipes.bulk_update_counters(batch),
            )
            .await
            .unwrap_or(Err(RepoError::Timeout));

            match outcome {
                Ok(rows) => return Ok(rows),
                Err(err) if attempt < attempts => {
                    let delay = self
                        .config
                        .retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        target = "recipehub::application::jobs::reconcile",
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "counter batch write failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn restore(&self, batch: &[CounterUpdate], prior: &[PriorCommit]) {
        let ids: HashSet<RecipeId> = batch.iter().map(|update| update.id).collect();
        let affected: Vec<PriorCommit> = prior
            .iter()
            .filter(|commit| ids.contains(&commit.id))
            .copied()
            .collect();
        self.rollback(&affected).await;
    }

    async fn rollback(&self, prior: &[PriorCommit]) {
        for commit in prior {
            if let Err(err) = self
                .store
                .restore_committed(commit.metric, commit.id, commit.previous)
                .await
            {
                error!(
                    target = "recipehub::application::jobs::reconcile",
                    recipe_id = commit.id,
                    metric = %commit.metric,
                    error = %err,
                    "failed to restore committed counter; database lags until the next change"
                );
            }
        }
    }
}

/// Cron tick for the reconciliation worker.
#[derive(Default, Debug, Clone)]
pub struct ReconcileCountersJob;

impl From<chrono::DateTime<chrono::Utc>> for ReconcileCountersJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

pub async fn process_reconcile_job(
    _job: ReconcileCountersJob,
    ctx: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    match ctx.reconciler.run().await {
        Ok(_) => Ok(()),
        Err(ReconcileError::AlreadyRunning) => {
            info!(
                target = "recipehub::application::jobs::reconcile",
                "reconciliation already in progress; skipping tick"
            );
            Ok(())
        }
        Err(err) => Err(job_failed(err)),
    }
}
