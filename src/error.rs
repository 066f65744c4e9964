use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::storage::DownloadPathError;

/// Failure of one API call, mapped onto an HTTP status at the handler
/// boundary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Client input rejected before any model call.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// A hosted model or the reconstruction pipeline failed. The upstream
    /// message is passed through to the caller.
    #[error("{context}: {message}")]
    Upstream {
        context: &'static str,
        message: String,
    },

    #[error("{context}: {message}")]
    Storage {
        context: &'static str,
        message: String,
    },
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn upstream(context: &'static str, err: impl std::fmt::Display) -> Self {
        AppError::Upstream {
            context,
            message: err.to_string(),
        }
    }

    pub fn storage(context: &'static str, err: &anyhow::Error) -> Self {
        AppError::Storage {
            context,
            message: format!("{err:#}"),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream { .. } | AppError::Storage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Upstream { .. } => "UPSTREAM_ERROR",
            AppError::Storage { .. } => "STORAGE_ERROR",
        }
    }
}

impl From<DownloadPathError> for AppError {
    fn from(err: DownloadPathError) -> Self {
        match err {
            DownloadPathError::Empty => AppError::BadRequest(err.to_string()),
            DownloadPathError::OutsideOutputDir(_) => AppError::Forbidden(err.to_string()),
            DownloadPathError::NotFound => AppError::NotFound(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            error!(code = self.code(), error = %message, "Request failed");
        } else {
            warn!(code = self.code(), error = %message, "Request rejected");
        }

        let body = json!({
            "detail": message,
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}
