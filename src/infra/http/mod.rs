mod handlers;
mod middleware;

pub use middleware::{CallerId, USER_ID_HEADER};

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::application::{
    counters::CounterService, engagement::EngagementService, error::ErrorReport,
    recipes::RecipeDetailService,
};
use crate::cache::KeyValueCache;
use crate::infra::db::PostgresRepositories;

#[derive(Clone)]
pub struct HttpState {
    pub recipes: RecipeDetailService,
    pub engagement: EngagementService,
    pub counters: CounterService,
    pub cache: Arc<dyn KeyValueCache>,
    /// Absent when the router runs over in-memory repositories.
    pub db: Option<Arc<PostgresRepositories>>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/recipes/{id}", get(handlers::get_recipe))
        .route("/recipes/{id}/like", post(handlers::toggle_like))
        .route("/recipes/{id}/save", post(handlers::save_recipe))
        .route("/tags/{id}/save", post(handlers::save_tag))
        .route("/ingredients/{id}/save", post(handlers::save_ingredient))
        .route(
            "/recipes/{id}/counters",
            post(handlers::create_counters).delete(handlers::delete_counters),
        )
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
}

/// Reports 204 when both the database and the cache answer.
async fn health(State(state): State<HttpState>) -> Response {
    if let Some(db) = state.db.as_ref() {
        if let Err(err) = db.health_check().await {
            return unavailable("infra::http::db_health", &err);
        }
    }
    if let Err(err) = state.cache.ping().await {
        return unavailable("infra::http::cache_health", &err);
    }
    StatusCode::NO_CONTENT.into_response()
}

fn unavailable(source: &'static str, err: &dyn std::error::Error) -> Response {
    let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
    ErrorReport::from_error(source, StatusCode::SERVICE_UNAVAILABLE, err).attach(&mut response);
    response
}
