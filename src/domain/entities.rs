//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::types::{Metric, RecipeId, UserId};

/// The three write-behind counters of a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterValues {
    pub views: i64,
    pub likes: i64,
    pub save_count: i64,
}

impl CounterValues {
    pub fn get(&self, metric: Metric) -> i64 {
        match metric {
            Metric::Views => self.views,
            Metric::Likes => self.likes,
            Metric::SaveCount => self.save_count,
        }
    }

    pub fn set(&mut self, metric: Metric, value: i64) {
        match metric {
            Metric::Views => self.views = value,
            Metric::Likes => self.likes = value,
            Metric::SaveCount => self.save_count = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecipeRecord {
    pub id: RecipeId,
    pub author_id: UserId,
    pub title: String,
    pub description: String,
    pub cost_time: i32,
    pub created_at: OffsetDateTime,
    pub counters: CounterValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipePhotoRecord {
    pub id: i64,
    pub url: String,
    pub category: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStepRecord {
    pub step: i32,
    pub description: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeCommentRecord {
    pub id: i64,
    pub user_id: UserId,
    pub body: String,
    pub rating: Option<i16>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A recipe row joined with its children and the aggregates computed over its comments.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeAggregate {
    pub recipe: RecipeRecord,
    pub ingredients: Vec<String>,
    pub tags: Vec<String>,
    pub photos: Vec<RecipePhotoRecord>,
    pub steps: Vec<RecipeStepRecord>,
    pub average_rating: Option<f64>,
    pub comment_count: i64,
    /// Newest first.
    pub recent_comments: Vec<RecipeCommentRecord>,
}

/// Counter columns of one recipe row, as read by the bootstrap pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub id: RecipeId,
    pub values: CounterValues,
}
