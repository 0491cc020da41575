//! Like and save toggles.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::application::counters::CounterService;
use crate::application::repos::{EngagementRepo, RecipesRepo, RepoError};
use crate::domain::types::{Metric, RecipeId, SaveTarget, ToggleOutcome, UserId};

#[derive(Debug, Error)]
pub enum EngagementError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error(transparent)]
    Repo(RepoError),
}

#[derive(Clone)]
pub struct EngagementService {
    recipes: Arc<dyn RecipesRepo>,
    engagement: Arc<dyn EngagementRepo>,
    counters: CounterService,
}

impl EngagementService {
    pub fn new(
        recipes: Arc<dyn RecipesRepo>,
        engagement: Arc<dyn EngagementRepo>,
        counters: CounterService,
    ) -> Self {
        Self {
            recipes,
            engagement,
            counters,
        }
    }

    /// Flips the like relation and applies the matching delta to `likes`.
    pub async fn toggle_like(
        &self,
        user: UserId,
        recipe: RecipeId,
    ) -> Result<ToggleOutcome, EngagementError> {
        self.ensure_recipe(recipe).await?;

        let outcome = self
            .engagement
            .toggle_like(user, recipe)
            .await
            .map_err(|err| not_found_as("recipe", recipe, err))?;
        self.apply(Metric::Likes, recipe, outcome).await;
        Ok(outcome)
    }

    /// Flips the save relation. Only recipe saves go through the counter store.
    pub async fn toggle_save(
        &self,
        user: UserId,
        target: SaveTarget,
    ) -> Result<ToggleOutcome, EngagementError> {
        let (entity, id) = match target {
            SaveTarget::Recipe(id) => {
                self.ensure_recipe(id).await?;
                ("recipe", id)
            }
            SaveTarget::Tag(id) | SaveTarget::Ingredient(id) => (target.entity(), id),
        };

        let outcome = self
            .engagement
            .toggle_save(user, target)
            .await
            .map_err(|err| not_found_as(entity, id, err))?;

        if let SaveTarget::Recipe(recipe) = target {
            self.apply(Metric::SaveCount, recipe, outcome).await;
        }
        Ok(outcome)
    }

    async fn ensure_recipe(&self, id: RecipeId) -> Result<(), EngagementError> {
        match self.recipes.find_by_id(id).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(EngagementError::NotFound {
                entity: "recipe",
                id,
            }),
            Err(err) => Err(EngagementError::Repo(err)),
        }
    }

    async fn apply(&self, metric: Metric, recipe: RecipeId, outcome: ToggleOutcome) {
        let delta = outcome.delta();
        if delta == 0 {
            debug!(
                target = "recipehub::application::engagement",
                recipe_id = recipe,
                metric = %metric,
                "toggle raced with an identical request; counter untouched"
            );
            return;
        }
        self.counters.bump(metric, recipe, delta).await;
    }
}

fn not_found_as(entity: &'static str, id: i64, err: RepoError) -> EngagementError {
    match err {
        RepoError::NotFound => EngagementError::NotFound { entity, id },
        other => EngagementError::Repo(other),
    }
}
