//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{CounterSnapshot, RecipeAggregate, RecipeRecord};
use crate::domain::types::{Metric, RecipeId, SaveTarget, ToggleOutcome, UserId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Partial counter update for one recipe row.
///
/// `None` leaves the column untouched. Values are absolute, not deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdate {
    pub id: RecipeId,
    pub views: Option<i64>,
    pub likes: Option<i64>,
    pub save_count: Option<i64>,
}

impl CounterUpdate {
    pub fn new(id: RecipeId) -> Self {
        Self {
            id,
            views: None,
            likes: None,
            save_count: None,
        }
    }

    pub fn get(&self, metric: Metric) -> Option<i64> {
        match metric {
            Metric::Views => self.views,
            Metric::Likes => self.likes,
            Metric::SaveCount => self.save_count,
        }
    }

    pub fn set(&mut self, metric: Metric, value: i64) {
        match metric {
            Metric::Views => self.views = Some(value),
            Metric::Likes => self.likes = Some(value),
            Metric::SaveCount => self.save_count = Some(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        Metric::ALL.iter().all(|metric| self.get(*metric).is_none())
    }
}

#[async_trait]
pub trait RecipesRepo: Send + Sync {
    async fn find_by_id(&self, id: RecipeId) -> Result<Option<RecipeRecord>, RepoError>;

    /// Recipe row plus children, comment aggregates and the newest comments.
    async fn find_with_aggregates(
        &self,
        id: RecipeId,
    ) -> Result<Option<RecipeAggregate>, RepoError>;

    /// Recipes ordered by `views` descending, ties by id. `None` loads every row.
    async fn list_top_by_views(&self, limit: Option<u32>)
    -> Result<Vec<RecipeAggregate>, RepoError>;

    async fn list_counters(&self) -> Result<Vec<CounterSnapshot>, RepoError>;

    /// Applies every update atomically and returns the number of rows touched.
    /// Ids without a row are ignored.
    async fn bulk_update_counters(&self, updates: &[CounterUpdate]) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait EngagementRepo: Send + Sync {
    /// Flips the like row of `(user, recipe)`.
    async fn toggle_like(
        &self,
        user: UserId,
        recipe: RecipeId,
    ) -> Result<ToggleOutcome, RepoError>;

    /// Flips the save row of `(user, target)`.
    ///
    /// Tag and ingredient saves also adjust the target's `save_count` column in
    /// the same transaction. Recipe saves leave the column to reconciliation.
    /// Returns [`RepoError::NotFound`] when the target row does not exist.
    async fn toggle_save(
        &self,
        user: UserId,
        target: SaveTarget,
    ) -> Result<ToggleOutcome, RepoError>;
}
