//! Thread CRUD.
//!
//! - `POST   /v1/threads`
//! - `GET    /v1/threads`
//! - `GET    /v1/threads/:id`
//! - `POST   /v1/threads/:id/archive`
//! - `DELETE /v1/threads/:id`
//! - `PUT    /v1/threads/:id/config`

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use cx_db::models::ThreadConfig;

use super::error::ApiResult;
use crate::state::AppState;

/// There's no authenticated-identity layer yet; requests that omit
/// `user_id` are attributed to this single default user.
const DEFAULT_USER: &str = "default";

#[derive(Debug, Deserialize)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_title() -> String {
    "New chat".to_string()
}

pub async fn create(State(state): State<AppState>, Json(body): Json<CreateThreadRequest>) -> ApiResult<impl IntoResponse> {
    let user_id = body.user_id.as_deref().unwrap_or(DEFAULT_USER);
    let thread = cx_db::threads::create(&state.db, user_id, &body.title).await?;
    Ok((axum::http::StatusCode::CREATED, Json(thread)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<impl IntoResponse> {
    let user_id = q.user_id.as_deref().unwrap_or(DEFAULT_USER);
    let threads = cx_db::threads::list(&state.db, user_id, q.include_archived).await?;
    Ok(Json(threads))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let thread = cx_db::threads::require(&state.db, id).await?;
    Ok(Json(thread))
}

pub async fn archive(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    cx_db::threads::require(&state.db, id).await?;
    cx_db::threads::set_archived(&state.db, id, true).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    cx_db::threads::require(&state.db, id).await?;
    let _permit = state.thread_locks.acquire(&id.to_string()).await;
    cx_db::threads::delete(&state.db, id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn get_config(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    cx_db::threads::require(&state.db, id).await?;
    let config = cx_db::threads::get_config(&state.db, id).await?;
    Ok(Json(config))
}

pub async fn put_config(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(config): Json<ThreadConfig>,
) -> ApiResult<impl IntoResponse> {
    cx_db::threads::require(&state.db, id).await?;
    cx_db::threads::upsert_config(&state.db, id, &config).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
