//! Shared domain enumerations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a recipe row.
pub type RecipeId = i64;
/// Identifier of a user row.
pub type UserId = i64;

/// A write-behind recipe counter.
///
/// Every metric is tracked independently in the counter store and maps onto the
/// column of the same name in the `recipes` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Views,
    Likes,
    SaveCount,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Views, Metric::Likes, Metric::SaveCount];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Views => "views",
            Metric::Likes => "likes",
            Metric::SaveCount => "save_count",
        }
    }
}

impl TryFrom<&str> for Metric {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "views" => Ok(Metric::Views),
            "likes" => Ok(Metric::Likes),
            "save_count" => Ok(Metric::SaveCount),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity a user can bookmark.
///
/// Only recipes feed the cached `save_count` counter; tag and ingredient save
/// counts are low-frequency and are written straight to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SaveTarget {
    Recipe(RecipeId),
    Tag(i64),
    Ingredient(i64),
}

impl SaveTarget {
    pub fn entity(self) -> &'static str {
        match self {
            SaveTarget::Recipe(_) => "recipe",
            SaveTarget::Tag(_) => "tag",
            SaveTarget::Ingredient(_) => "ingredient",
        }
    }
}

/// Result of flipping a user/entity relationship row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    Added,
    Removed,
    /// A concurrent request already produced the same state.
    Unchanged,
}

impl ToggleOutcome {
    /// Counter delta implied by the outcome.
    pub fn delta(self) -> i64 {
        match self {
            ToggleOutcome::Added => 1,
            ToggleOutcome::Removed => -1,
            ToggleOutcome::Unchanged => 0,
        }
    }
}

/// How the engine reacts to an increment against a counter that was never initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterPolicy {
    /// Log and drop the increment.
    #[default]
    Strict,
    /// Seed the counter from the database row, then retry the increment once.
    AutoInitialize,
}

impl TryFrom<&str> for CounterPolicy {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "strict" => Ok(CounterPolicy::Strict),
            "auto_initialize" | "auto_init" => Ok(CounterPolicy::AutoInitialize),
            _ => Err(()),
        }
    }
}
