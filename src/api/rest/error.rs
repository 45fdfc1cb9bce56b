use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::analyst::error::AnalystError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// The completion service failed or answered in an unknown shape.
    Upstream(String),
    Internal(anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", e),
            ),
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl From<AnalystError> for ApiError {
    fn from(e: AnalystError) -> Self {
        match e {
            AnalystError::Completion(_) | AnalystError::Envelope(_) | AnalystError::Request(_) => {
                ApiError::Upstream(e.to_string())
            }
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}
