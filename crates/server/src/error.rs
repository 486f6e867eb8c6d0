use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::ApiResponse;
use crate::services::git::GitError;
use crate::services::storage::StorageError;

pub const INTERNAL_ERROR: &str = "Internal application error";

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// A field carried a value that is well-formed but unacceptable.
    #[error("Invalid value for field '{field}'")]
    Conflict { field: String },

    #[error("Invalid HTTP request method")]
    MethodNotAllowed,

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn conflict(field: impl Into<String>) -> Self {
        AppError::Conflict {
            field: field.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(format!("Database error: {e}"))
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        AppError::Internal(format!("Storage error: {e}"))
    }
}

impl From<GitError> for AppError {
    fn from(e: GitError) -> Self {
        AppError::Internal(format!("Git error: {e}"))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Background task failed: {e}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AppError::Internal(cause) => {
                tracing::error!("{cause}");
                ApiResponse::fatal(INTERNAL_ERROR)
            }
            AppError::Conflict { field } => {
                ApiResponse::error(self.to_string()).with_data(serde_json::json!({ "field": field }))
            }
            _ => ApiResponse::error(self.to_string()),
        };

        (status, Json(body)).into_response()
    }
}
