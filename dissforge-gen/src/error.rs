//! HTTP error type
//!
//! Every failure renders as `{"error": {"code", "message", "stage"?, "run_id"?}}`.
//! Pipeline failures map to 502 (transient cause, retries exhausted),
//! 422 (permanent cause) or 507 (storage exhausted).

use crate::adapters::ErrorClass;
use crate::models::RequestError;
use crate::pipeline::PipelineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// A generation run failed
    #[error("Generation failed: {error}")]
    Pipeline { run_id: Uuid, error: PipelineError },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Common error: {0}")]
    Common(#[from] dissforge_common::Error),
}

impl From<RequestError> for ApiError {
    fn from(err: RequestError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "code": "NOT_FOUND", "message": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "code": "BAD_REQUEST", "message": msg })),
            ApiError::Pipeline { run_id, error } => {
                let status = match error.class() {
                    ErrorClass::Transient => StatusCode::BAD_GATEWAY,
                    ErrorClass::Permanent => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorClass::ResourceExhausted => StatusCode::INSUFFICIENT_STORAGE,
                };
                (
                    status,
                    json!({
                        "code": error.cause_code(),
                        "message": error.cause.to_string(),
                        "stage": error.stage.label(),
                        "run_id": run_id,
                    }),
                )
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "code": "INTERNAL_ERROR", "message": msg }),
            ),
            ApiError::Common(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "code": "COMMON_ERROR", "message": err.to_string() }),
            ),
        };

        (status, Json(json!({ "error": body }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ScrapeError, StageError};
    use crate::audio::AnalysisError;
    use crate::pipeline::StageKind;
    use dissforge_common::Fingerprint;

    fn pipeline(stage: StageKind, cause: StageError) -> ApiError {
        ApiError::Pipeline {
            run_id: Uuid::new_v4(),
            error: PipelineError::new(stage, Fingerprint::builder().field("x").finish(), 1, cause),
        }
    }

    #[test]
    fn test_status_by_class() {
        assert_eq!(
            pipeline(StageKind::Scrape, ScrapeError::RateLimited.into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            pipeline(
                StageKind::BeatGrid,
                AnalysisError::NoReliableTempo { found: 0, required: 8 }.into()
            )
            .into_response()
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            pipeline(StageKind::Master, StageError::CapacityExhausted("full".into()))
                .into_response()
                .status(),
            StatusCode::INSUFFICIENT_STORAGE
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
