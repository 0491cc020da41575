//! Cache key layout.
//!
//! Counter planes are one hash per (metric, plane) with the recipe id as the
//! field. Detail blobs are one string key per recipe, namespaced by the schema
//! version of the payload.

use crate::domain::recipes::DETAIL_SCHEMA_VERSION;
use crate::domain::types::{Metric, RecipeId};

/// Lease held while a reconciliation cycle runs.
pub const RECONCILE_LEASE_KEY: &str = "recipe:reconcile:lease";

/// The two snapshots kept per metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterPlane {
    /// Live value, mutated by every user action.
    Current,
    /// Value the database held after the last reconciliation.
    Committed,
}

impl CounterPlane {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterPlane::Current => "current",
            CounterPlane::Committed => "committed",
        }
    }
}

pub fn counter_hash_key(metric: Metric, plane: CounterPlane) -> String {
    format!("recipe:counters:{}:{}", metric.as_str(), plane.as_str())
}

pub fn counter_field(id: RecipeId) -> String {
    id.to_string()
}

pub fn parse_counter_field(field: &str) -> Option<RecipeId> {
    field.parse().ok()
}

const DETAIL_KEY_PREFIX: &str = "recipe:detail:";

pub fn detail_key(id: RecipeId) -> String {
    format!("{DETAIL_KEY_PREFIX}v{DETAIL_SCHEMA_VERSION}:{id}")
}

/// Whether `key` names a detail blob of any schema version.
pub fn is_detail_key(key: &str) -> bool {
    key.starts_with(DETAIL_KEY_PREFIX)
}
