use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage::sweeper::sweep_expired;
use crate::utils::timing::{complete_request_timer, start_request_timer};

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub message: String,
    pub deleted: usize,
}

/// GET /download/{*file_path}
///
/// Streams a generated asset. Only files inside the output directory are
/// served.
pub async fn download(
    State(state): State<AppState>,
    Path(file_path): Path<String>,
) -> AppResult<Response> {
    let resolved = state.storage.resolve_download(&file_path)?;
    let file_name = resolved
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());

    let file = File::open(&resolved).await.map_err(|err| {
        AppError::storage("Failed to open file", &anyhow::Error::new(err))
    })?;
    info!("Serving download {}", resolved.display());

    let body = Body::from_stream(ReaderStream::new(file));
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        ),
    ];
    Ok((headers, body).into_response())
}

/// DELETE /cleanup
pub async fn cleanup(State(state): State<AppState>) -> AppResult<Json<CleanupResponse>> {
    let mut timer = start_request_timer("/cleanup");
    match sweep_expired(&state.storage, state.retention).await {
        Ok(deleted) => {
            complete_request_timer(&mut timer, "success", None);
            Ok(Json(CleanupResponse {
                message: format!("Cleaned up {deleted} files"),
                deleted,
            }))
        }
        Err(err) => {
            let err = AppError::storage("Cleanup failed", &err);
            complete_request_timer(&mut timer, "error", Some(err.to_string()));
            Err(err)
        }
    }
}
