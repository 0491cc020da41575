//! Startup seeding of the counter planes from the database.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::application::repos::{RecipesRepo, RepoError};
use crate::cache::{CounterError, CounterStore, InitOutcome};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Counter(#[from] CounterError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub recipes: usize,
    pub created: usize,
    pub already_present: usize,
}

pub struct CounterBootstrapper {
    recipes: Arc<dyn RecipesRepo>,
    counters: CounterStore,
}

impl CounterBootstrapper {
    pub fn new(recipes: Arc<dyn RecipesRepo>, counters: CounterStore) -> Self {
        Self { recipes, counters }
    }

    /// Initializes every metric of every recipe row. Live counters are kept.
    pub async fn run(&self) -> Result<BootstrapReport, BootstrapError> {
        let snapshots = self.recipes.list_counters().await?;
        let mut report = BootstrapReport {
            recipes: snapshots.len(),
            ..Default::default()
        };

        for snapshot in snapshots {
            for (_, outcome) in self
                .counters
                .initialize_all(snapshot.id, snapshot.values)
                .await?
            {
                match outcome {
                    InitOutcome::Created => report.created += 1,
                    InitOutcome::AlreadyPresent => report.already_present += 1,
                }
            }
        }

        info!(
            target = "recipehub::application::jobs::bootstrap",
            recipes = report.recipes,
            created = report.created,
            already_present = report.already_present,
            "counter planes bootstrapped"
        );
        Ok(report)
    }
}
