//! yac-server — the HTTP surface (§6) over the `yac-*` library crates:
//! authentication, per-operation orchestration, and the axum routes that
//! tie them together.

pub mod auth;
pub mod error_response;
pub mod handlers;
pub mod log;
pub mod orchestrator;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::state::AppState;

/// Builds the full route table (§6.1) over a shared `AppState`, with CORS
/// configured from `cors_origins` (§6.2).
pub fn router(state: Arc<AppState>) -> Router {
    let origins: Vec<_> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/meta", get(handlers::meta))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/me", get(handlers::me))
        .route("/entity", get(handlers::list_types))
        .route("/entity/{type}", get(handlers::list_entities).post(handlers::create))
        .route(
            "/entity/{type}/{name}",
            get(handlers::detail).put(handlers::replace).patch(handlers::patch).delete(handlers::delete),
        )
        .route("/entity/{type}/{name}/yaml", get(handlers::raw_yaml))
        .route("/entity/{type}/{name}/logs", get(handlers::logs))
        .route("/entity/{type}/{name}/run/{action}", post(handlers::run_action))
        .route("/validate", post(handlers::validate))
        .layer(cors)
        .with_state(state)
}
