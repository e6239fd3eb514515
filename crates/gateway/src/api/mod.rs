pub mod artifacts;
pub mod auth;
pub mod error;
pub mod messages;
pub mod threads;

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health));

    let protected = Router::new()
        .route("/v1/threads", post(threads::create).get(threads::list))
        .route("/v1/threads/:id", get(threads::get).delete(threads::delete))
        .route("/v1/threads/:id/archive", post(threads::archive))
        .route(
            "/v1/threads/:id/config",
            get(threads::get_config).put(threads::put_config),
        )
        .route("/v1/threads/:id/messages", get(messages::list).post(messages::post))
        .route("/v1/artifacts/:id", get(artifacts::download))
        .route("/v1/artifacts/:id/head", get(artifacts::head))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public.merge(protected).layer(tower_http::trace::TraceLayer::new_for_http())
}
