//! Message submission and retrieval.
//!
//! - `POST /v1/threads/:id/messages` — append a user message and stream the
//!   resulting turn back as SSE
//! - `GET  /v1/threads/:id/messages` — full message history for a thread

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;
use uuid::Uuid;

use cx_db::models::MessageRole;

use super::error::{ApiError, ApiResult};
use crate::runtime::orchestrator::SseFrame;
use crate::runtime::run_turn;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    /// Caller-supplied idempotency key, unique within the thread. Reusing
    /// an id already seen on this thread fails the insert with a 409
    /// rather than running the model again against a duplicate message.
    pub message_id: String,
    /// Must be `"user"` — this endpoint only accepts turns the end user
    /// sent; assistant/tool rows are produced internally by the run.
    pub role: String,
    pub content: String,
}

pub async fn list(State(state): State<AppState>, Path(thread_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    cx_db::threads::require(&state.db, thread_id).await?;
    let messages = cx_db::messages::list_for_thread(&state.db, thread_id).await?;
    Ok(Json(messages))
}

pub async fn post(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Json(body): Json<PostMessageRequest>,
) -> axum::response::Response {
    if body.role != "user" {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": format!("unsupported role '{}': only 'user' is accepted", body.role) })),
        )
            .into_response();
    }

    if let Err(resp) = require_llm_provider(&state) {
        return resp.into_response();
    }

    if let Err(e) = cx_db::threads::require(&state.db, thread_id).await {
        return ApiError(e).into_response();
    }

    let new_message = cx_db::messages::NewMessage {
        thread_id,
        message_id: body.message_id.clone(),
        role: MessageRole::User,
        content: Some(serde_json::json!({ "text": body.content })),
        tool_name: None,
        tool_input: None,
        tool_output: None,
        metadata: None,
    };

    if let Err(e) = cx_db::messages::insert(&state.db, new_message).await {
        return ApiError(e).into_response();
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<SseFrame>(64);
    tokio::spawn(run_turn(state, thread_id, body.message_id, tx));

    let stream = make_sse_stream(rx);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn make_sse_stream(mut rx: tokio::sync::mpsc::Receiver<SseFrame>) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            let data = serde_json::to_string(&frame).unwrap_or_default();
            yield Ok(Event::default().data(data));
        }
    }
}

/// Pre-flight check: return a structured 503 if no LLM providers are
/// available, rather than letting the turn fail mid-stream.
fn require_llm_provider(state: &AppState) -> Result<(), (axum::http::StatusCode, Json<serde_json::Value>)> {
    if !state.llm.is_empty() {
        return Ok(());
    }

    let init_errors: Vec<serde_json::Value> = state
        .llm
        .init_errors()
        .iter()
        .map(|e| serde_json::json!({ "provider_id": e.provider_id, "kind": e.kind, "error": e.error }))
        .collect();

    Err((
        axum::http::StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "error": "no_llm_provider",
            "reason": "No LLM providers are available. Configure at least one provider in config.toml under [[llm.providers]].",
            "init_errors": init_errors,
        })),
    ))
}
