//! Denormalized recipe representation stored in the detail cache.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::entities::{
    CounterValues, RecipeAggregate, RecipeCommentRecord, RecipePhotoRecord, RecipeStepRecord,
};
use crate::domain::types::{Metric, RecipeId, UserId};

/// Bump whenever the serialized shape of [`RecipeDetail`] changes.
///
/// The version is part of the cache key as well as the payload, so entries
/// written by an older build are never read back by a newer one.
pub const DETAIL_SCHEMA_VERSION: u32 = 1;

/// Upper bound of comments embedded in a cached detail.
pub const MAX_RECENT_COMMENTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDetail {
    pub schema_version: u32,
    pub id: RecipeId,
    pub author_id: UserId,
    pub title: String,
    pub description: String,
    pub cost_time: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub ingredients: Vec<String>,
    pub tags: Vec<String>,
    pub photos: Vec<RecipePhotoRecord>,
    pub steps: Vec<RecipeStepRecord>,
    pub views: i64,
    pub likes: i64,
    pub save_count: i64,
    pub average_rating: Option<f64>,
    pub comment_count: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_comments: Vec<RecipeCommentRecord>,
}

impl RecipeDetail {
    pub fn counters(&self) -> CounterValues {
        CounterValues {
            views: self.views,
            likes: self.likes,
            save_count: self.save_count,
        }
    }

    pub fn counter(&self, metric: Metric) -> i64 {
        self.counters().get(metric)
    }

    pub fn set_counter(&mut self, metric: Metric, value: i64) {
        match metric {
            Metric::Views => self.views = value,
            Metric::Likes => self.likes = value,
            Metric::SaveCount => self.save_count = value,
        }
    }

    pub fn bump(&mut self, metric: Metric, delta: i64) {
        let value = self.counter(metric).saturating_add(delta);
        self.set_counter(metric, value);
    }

    pub fn is_current_schema(&self) -> bool {
        self.schema_version == DETAIL_SCHEMA_VERSION
    }
}

impl From<RecipeAggregate> for RecipeDetail {
    fn from(aggregate: RecipeAggregate) -> Self {
        let RecipeAggregate {
            recipe,
            ingredients,
            tags,
            photos,
            steps,
            average_rating,
            comment_count,
            mut recent_comments,
        } = aggregate;

        recent_comments.truncate(MAX_RECENT_COMMENTS);

        Self {
            schema_version: DETAIL_SCHEMA_VERSION,
            id: recipe.id,
            author_id: recipe.author_id,
            title: recipe.title,
            description: recipe.description,
            cost_time: recipe.cost_time,
            created_at: recipe.created_at,
            ingredients,
            tags,
            photos,
            steps,
            views: recipe.counters.views,
            likes: recipe.counters.likes,
            save_count: recipe.counters.save_count,
            average_rating,
            comment_count,
            recent_comments,
        }
    }
}
