//! Artifact download.
//!
//! `GET /v1/artifacts/:id?token=...` — redeem a signed download token and
//! stream the underlying blob back with its declared MIME type.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use cx_domain::error::Error;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub token: String,
}

pub async fn download(State(state): State<AppState>, Path(id): Path<Uuid>, Query(q): Query<DownloadQuery>) -> Response {
    match download_inner(&state, id, &q.token).await {
        Ok(resp) => resp,
        Err(e) => ApiError(e).into_response(),
    }
}

async fn download_inner(state: &AppState, id: Uuid, token: &str) -> Result<Response, Error> {
    let tokens = state
        .artifacts
        .tokens()
        .ok_or_else(|| Error::Config("download tokens are not configured on this server".into()))?;

    let token_artifact_id = tokens.verify(token)?;
    if token_artifact_id != id {
        return Err(Error::Forbidden("download token was not issued for this artifact".into()));
    }

    let artifact = state
        .artifacts
        .get_by_id(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("artifact {id} not found")))?;

    let blob_path = state.artifacts.blob_path_for(&artifact.fingerprint);
    let file = tokio::fs::File::open(&blob_path)
        .await
        .map_err(|e| Error::Gone(format!("artifact blob missing from store: {e}")))?;

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let disposition = if is_inline_mime(&artifact.mime) {
        "inline".to_string()
    } else {
        format!("attachment; filename=\"{}\"", artifact.filename.replace('"', ""))
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.mime.clone()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, artifact.size_bytes.to_string()),
        ],
        body,
    )
        .into_response())
}

/// HTML and common image types are safe to render inline in a browser tab;
/// everything else (CSVs, binaries, archives) downloads as an attachment.
fn is_inline_mime(mime: &str) -> bool {
    mime == "text/html" || mime.starts_with("image/")
}

/// `GET /v1/artifacts/:id/head` — artifact metadata, gated by the same
/// download token as [`download`] but without streaming the blob.
pub async fn head(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<DownloadQuery>,
) -> Result<Json<cx_db::models::Artifact>, ApiError> {
    let tokens = state
        .artifacts
        .tokens()
        .ok_or_else(|| Error::Config("download tokens are not configured on this server".into()))?;

    let token_artifact_id = tokens.verify(&q.token)?;
    if token_artifact_id != id {
        return Err(Error::Forbidden("download token was not issued for this artifact".into()).into());
    }

    let artifact = state
        .artifacts
        .get_by_id(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("artifact {id} not found")))?;
    Ok(Json(artifact))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_and_images_are_inline() {
        assert!(is_inline_mime("text/html"));
        assert!(is_inline_mime("image/png"));
        assert!(is_inline_mime("image/svg+xml"));
    }

    #[test]
    fn everything_else_is_attachment() {
        assert!(!is_inline_mime("text/csv"));
        assert!(!is_inline_mime("application/pdf"));
        assert!(!is_inline_mime("application/zip"));
        assert!(!is_inline_mime("application/octet-stream"));
    }
}
