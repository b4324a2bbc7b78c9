use axum::{http::StatusCode, response::{IntoResponse, Response}};

use crate::gateway::GatewayError;

pub type AppResult<T> = Result<T, AppError>;

/// Crate-wide error taxonomy. Every public operation catches collaborator
/// failures at its boundary and maps them into one of these.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed input; the caller can fix it and retry.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Missing session/user; benign for most operations.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A gateway operation failed after the single allowed retry.
    #[error(transparent)]
    Delivery(#[from] GatewayError),

    /// Storage is unavailable; fatal for the operation, retryable for the caller.
    #[error("storage error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Shared state was observed in a shape that should be unreachable.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Delivery(_) => StatusCode::BAD_GATEWAY,
            AppError::Persistence(_) | AppError::Invariant(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Storage details stay in the logs.
        let body = match &self {
            AppError::Persistence(e) => {
                tracing::error!("persistence failure: {e}");
                "storage unavailable, try again later".to_string()
            }
            other => other.to_string(),
        };

        (status, body).into_response()
    }
}
