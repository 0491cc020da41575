use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::{
    application::error::AppError,
    cache::InitOutcome,
    domain::{
        entities::CounterValues,
        recipes::RecipeDetail,
        types::{Metric, RecipeId, SaveTarget, ToggleOutcome},
    },
};

use super::{HttpState, middleware::CallerId};

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub outcome: ToggleOutcome,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateCountersRequest {
    pub views: i64,
    pub likes: i64,
    pub save_count: i64,
}

#[derive(Debug, Serialize)]
pub struct CreateCountersResponse {
    pub created: Vec<Metric>,
    pub already_present: Vec<Metric>,
}

pub async fn get_recipe(
    State(state): State<HttpState>,
    Path(id): Path<RecipeId>,
) -> Result<Json<RecipeDetail>, AppError> {
    let detail = state.recipes.get_recipe_detail(id).await?;
    Ok(Json(detail))
}

pub async fn toggle_like(
    State(state): State<HttpState>,
    CallerId(user): CallerId,
    Path(id): Path<RecipeId>,
) -> Result<Json<ToggleResponse>, AppError> {
    let outcome = state.engagement.toggle_like(user, id).await?;
    Ok(Json(ToggleResponse { outcome }))
}

pub async fn save_recipe(
    State(state): State<HttpState>,
    caller: CallerId,
    Path(id): Path<RecipeId>,
) -> Result<Json<ToggleResponse>, AppError> {
    toggle_save(state, caller, SaveTarget::Recipe(id)).await
}

pub async fn save_tag(
    State(state): State<HttpState>,
    caller: CallerId,
    Path(id): Path<i64>,
) -> Result<Json<ToggleResponse>, AppError> {
    toggle_save(state, caller, SaveTarget::Tag(id)).await
}

pub async fn save_ingredient(
    State(state): State<HttpState>,
    caller: CallerId,
    Path(id): Path<i64>,
) -> Result<Json<ToggleResponse>, AppError> {
    toggle_save(state, caller, SaveTarget::Ingredient(id)).await
}

async fn toggle_save(
    state: HttpState,
    CallerId(user): CallerId,
    target: SaveTarget,
) -> Result<Json<ToggleResponse>, AppError> {
    let outcome = state.engagement.toggle_save(user, target).await?;
    Ok(Json(ToggleResponse { outcome }))
}

pub async fn create_counters(
    State(state): State<HttpState>,
    Path(id): Path<RecipeId>,
    Json(body): Json<CreateCountersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let values = CounterValues {
        views: body.views,
        likes: body.likes,
        save_count: body.save_count,
    };
    let outcomes = state.counters.create_entry(id, values).await?;

    let mut response = CreateCountersResponse {
        created: Vec::new(),
        already_present: Vec::new(),
    };
    for (metric, outcome) in outcomes {
        match outcome {
            InitOutcome::Created => response.created.push(metric),
            InitOutcome::AlreadyPresent => response.already_present.push(metric),
        }
    }

    let status = if response.created.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(response)))
}

pub async fn delete_counters(
    State(state): State<HttpState>,
    Path(id): Path<RecipeId>,
) -> Result<StatusCode, AppError> {
    state.counters.delete_entry(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
