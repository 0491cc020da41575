use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use crate::{
    application::repos::{EngagementRepo, RepoError},
    domain::types::{RecipeId, SaveTarget, ToggleOutcome, UserId},
};

use super::{PostgresRepositories, map_sqlx_error};

/// Relation table and target table of a save toggle.
struct SaveRelation {
    table: &'static str,
    column: &'static str,
    /// Table whose `save_count` is maintained synchronously, if any.
    counted: Option<&'static str>,
}

fn save_relation(target: SaveTarget) -> (SaveRelation, i64) {
    match target {
        SaveTarget::Recipe(id) => (
            SaveRelation {
                table: "recipe_saves",
                column: "recipe_id",
                counted: None,
            },
            id,
        ),
        SaveTarget::Tag(id) => (
            SaveRelation {
                table: "tag_saves",
                column: "tag_id",
                counted: Some("tags"),
            },
            id,
        ),
        SaveTarget::Ingredient(id) => (
            SaveRelation {
                table: "ingredient_saves",
                column: "ingredient_id",
                counted: Some("ingredients"),
            },
            id,
        ),
    }
}

/// Deletes the relation row if present, otherwise inserts it.
async fn toggle_row(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    column: &str,
    user: UserId,
    target: i64,
) -> Result<ToggleOutcome, RepoError> {
    let removed = sqlx::query(&format!(
        "DELETE FROM {table} WHERE user_id = $1 AND {column} = $2"
    ))
    .bind(user)
    .bind(target)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    if removed.rows_affected() > 0 {
        return Ok(ToggleOutcome::Removed);
    }

    let inserted = sqlx::query(&format!(
        "INSERT INTO {table} (user_id, {column}) VALUES ($1, $2) ON CONFLICT DO NOTHING"
    ))
    .bind(user)
    .bind(target)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    Ok(if inserted.rows_affected() == 1 {
        ToggleOutcome::Added
    } else {
        ToggleOutcome::Unchanged
    })
}

#[async_trait]
impl EngagementRepo for PostgresRepositories {
    async fn toggle_like(
        &self,
        user: UserId,
        recipe: RecipeId,
    ) -> Result<ToggleOutcome, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let outcome = toggle_row(&mut tx, "recipe_likes", "recipe_id", user, recipe).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(outcome)
    }

    async fn toggle_save(
        &self,
        user: UserId,
        target: SaveTarget,
    ) -> Result<ToggleOutcome, RepoError> {
        let (relation, id) = save_relation(target);
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        if let Some(counted) = relation.counted {
            // Row lock serializes toggles on the same target.
            let exists = sqlx::query(&format!("SELECT 1 FROM {counted} WHERE id = $1 FOR UPDATE"))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            if exists.is_none() {
                return Err(RepoError::NotFound);
            }
        }

        let outcome = toggle_row(&mut tx, relation.table, relation.column, user, id).await?;

        if let Some(counted) = relation.counted.filter(|_| outcome.delta() != 0) {
            sqlx::query(&format!(
                "UPDATE {counted} SET save_count = GREATEST(save_count + $1, 0) WHERE id = $2"
            ))
            .bind(outcome.delta())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(outcome)
    }
}
