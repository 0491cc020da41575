use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{FromRow, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    application::repos::{CounterUpdate, RecipesRepo, RepoError},
    domain::entities::{
        CounterSnapshot, CounterValues, RecipeAggregate, RecipeCommentRecord, RecipePhotoRecord,
        RecipeRecord, RecipeStepRecord,
    },
    domain::recipes::MAX_RECENT_COMMENTS,
    domain::types::RecipeId,
};

use super::{PostgresRepositories, map_sqlx_error};

const RECIPE_COLUMNS: &str = "r.id, r.author_id, r.title, r.description, r.cost_time, \
    r.created_at, r.views, r.likes, r.save_count";

const AGGREGATE_COLUMNS: &str = "\
    COALESCE((SELECT array_agg(i.name::text ORDER BY i.name) \
        FROM recipe_ingredients ri JOIN ingredients i ON i.id = ri.ingredient_id \
        WHERE ri.recipe_id = r.id), '{}'::text[]) AS ingredients, \
    COALESCE((SELECT array_agg(t.name::text ORDER BY t.name) \
        FROM recipe_tags rt JOIN tags t ON t.id = rt.tag_id \
        WHERE rt.recipe_id = r.id), '{}'::text[]) AS tags, \
    (SELECT AVG(c.rating)::float8 FROM recipe_comments c WHERE c.recipe_id = r.id) \
        AS average_rating, \
    (SELECT COUNT(*) FROM recipe_comments c WHERE c.recipe_id = r.id) AS comment_count";

#[derive(FromRow)]
struct RecipeRow {
    id: i64,
    author_id: i64,
    title: String,
    description: String,
    cost_time: i32,
    created_at: OffsetDateTime,
    views: i64,
    likes: i64,
    save_count: i64,
}

impl From<RecipeRow> for RecipeRecord {
    fn from(row: RecipeRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            description: row.description,
            cost_time: row.cost_time,
            created_at: row.created_at,
            counters: CounterValues {
                views: row.views,
                likes: row.likes,
                save_count: row.save_count,
            },
        }
    }
}

#[derive(FromRow)]
struct AggregateRow {
    #[sqlx(flatten)]
    recipe: RecipeRow,
    ingredients: Vec<String>,
    tags: Vec<String>,
    average_rating: Option<f64>,
    comment_count: i64,
}

#[derive(FromRow)]
struct PhotoRow {
    recipe_id: i64,
    id: i64,
    url: String,
    category: Option<String>,
    uploaded_at: OffsetDateTime,
}

#[derive(FromRow)]
struct StepRow {
    recipe_id: i64,
    step: i32,
    description: String,
    image_url: Option<String>,
}

#[derive(FromRow)]
struct CommentRow {
    recipe_id: i64,
    id: i64,
    user_id: i64,
    body: String,
    rating: Option<i16>,
    created_at: OffsetDateTime,
}

#[derive(FromRow)]
struct CounterRow {
    id: i64,
    views: i64,
    likes: i64,
    save_count: i64,
}

/// Child rows of a set of recipes, grouped by recipe id.
#[derive(Default)]
struct Children {
    photos: HashMap<RecipeId, Vec<RecipePhotoRecord>>,
    steps: HashMap<RecipeId, Vec<RecipeStepRecord>>,
    comments: HashMap<RecipeId, Vec<RecipeCommentRecord>>,
}

impl Children {
    fn assemble(&mut self, row: AggregateRow) -> RecipeAggregate {
        let id = row.recipe.id;
        RecipeAggregate {
            recipe: row.recipe.into(),
            ingredients: row.ingredients,
            tags: row.tags,
            photos: self.photos.remove(&id).unwrap_or_default(),
            steps: self.steps.remove(&id).unwrap_or_default(),
            average_rating: row.average_rating,
            comment_count: row.comment_count,
            recent_comments: self.comments.remove(&id).unwrap_or_default(),
        }
    }
}

impl PostgresRepositories {
    async fn load_children(&self, ids: &[RecipeId]) -> Result<Children, RepoError> {
        let mut children = Children::default();
        if ids.is_empty() {
            return Ok(children);
        }

        let photos = sqlx::query_as::<_, PhotoRow>(
            r#"
            SELECT recipe_id, id, url, category, uploaded_at
            FROM recipe_photos
            WHERE recipe_id = ANY($1)
            ORDER BY recipe_id, uploaded_at, id
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        for row in photos {
            children
                .photos
                .entry(row.recipe_id)
                .or_default()
                .push(RecipePhotoRecord {
                    id: row.id,
                    url: row.url,
                    category: row.category,
                    uploaded_at: row.uploaded_at,
                });
        }

        let steps = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT recipe_id, step, description, image_url
            FROM recipe_steps
            WHERE recipe_id = ANY($1)
            ORDER BY recipe_id, step
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        for row in steps {
            children
                .steps
                .entry(row.recipe_id)
                .or_default()
                .push(RecipeStepRecord {
                    step: row.step,
                    description: row.description,
                    image_url: row.image_url,
                });
        }

        let comments = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT recipe_id, id, user_id, body, rating, created_at
            FROM (
                SELECT c.*,
                       ROW_NUMBER() OVER (
                           PARTITION BY c.recipe_id ORDER BY c.created_at DESC, c.id DESC
                       ) AS position
                FROM recipe_comments c
                WHERE c.recipe_id = ANY($1)
            ) ranked
            WHERE position <= $2
            ORDER BY recipe_id, created_at DESC, id DESC
            "#,
        )
        .bind(ids)
        .bind(MAX_RECENT_COMMENTS as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        for row in comments {
            children
                .comments
                .entry(row.recipe_id)
                .or_default()
                .push(RecipeCommentRecord {
                    id: row.id,
                    user_id: row.user_id,
                    body: row.body,
                    rating: row.rating,
                    created_at: row.created_at,
                });
        }

        Ok(children)
    }
}

#[async_trait]
impl RecipesRepo for PostgresRepositories {
    async fn find_by_id(&self, id: RecipeId) -> Result<Option<RecipeRecord>, RepoError> {
        let row = sqlx::query_as::<_, RecipeRow>(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r WHERE r.id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(RecipeRecord::from))
    }

    async fn find_with_aggregates(
        &self,
        id: RecipeId,
    ) -> Result<Option<RecipeAggregate>, RepoError> {
        let Some(row) = sqlx::query_as::<_, AggregateRow>(&format!(
            "SELECT {RECIPE_COLUMNS}, {AGGREGATE_COLUMNS} FROM recipes r WHERE r.id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?
        else {
            return Ok(None);
        };

        let mut children = self.load_children(&[id]).await?;
        Ok(Some(children.assemble(row)))
    }

    async fn list_top_by_views(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<RecipeAggregate>, RepoError> {
        let rows = sqlx::query_as::<_, AggregateRow>(&format!(
            "SELECT {RECIPE_COLUMNS}, {AGGREGATE_COLUMNS} FROM recipes r \
             ORDER BY r.views DESC, r.id ASC LIMIT $1"
        ))
        .bind(limit.map(i64::from))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let ids: Vec<RecipeId> = rows.iter().map(|row| row.recipe.id).collect();
        let mut children = self.load_children(&ids).await?;
        Ok(rows.into_iter().map(|row| children.assemble(row)).collect())
    }

    async fn list_counters(&self) -> Result<Vec<CounterSnapshot>, RepoError> {
        let rows = sqlx::query_as::<_, CounterRow>(
            r#"
            SELECT id, views, likes, save_count
            FROM recipes
            ORDER BY id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| CounterSnapshot {
                id: row.id,
                values: CounterValues {
                    views: row.views,
                    likes: row.likes,
                    save_count: row.save_count,
                },
            })
            .collect())
    }

    async fn bulk_update_counters(&self, updates: &[CounterUpdate]) -> Result<u64, RepoError> {
        let updates: Vec<&CounterUpdate> =
            updates.iter().filter(|update| !update.is_empty()).collect();
        if updates.is_empty() {
            return Ok(0);
        }

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "UPDATE recipes AS r SET \
                views = COALESCE(v.views, r.views), \
                likes = COALESCE(v.likes, r.likes), \
                save_count = COALESCE(v.save_count, r.save_count) \
             FROM (",
        );
        qb.push_values(updates, |mut row, update| {
            row.push_bind(update.id)
                .push_bind(update.views)
                .push_unseparated("::bigint")
                .push_bind(update.likes)
                .push_unseparated("::bigint")
                .push_bind(update.save_count)
                .push_unseparated("::bigint");
        });
        qb.push(") AS v(id, views, likes, save_count) WHERE r.id = v.id");

        let result = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}
