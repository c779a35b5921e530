use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use thiserror::Error;

/// User-visible failures are `SourceNotFound`, `UnsupportedFormat` and
/// `ConversionFailed`; everything else degrades inside the pipeline and only
/// reaches logs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source asset `{0}` not found")]
    SourceNotFound(String),

    #[error("unsupported target format `{0}`")]
    UnsupportedFormat(String),

    #[error("conversion of `{asset_id}` from {source_format} to {target} failed: {reason}")]
    ConversionFailed {
        asset_id: String,
        source_format: String,
        target: String,
        reason: String,
    },

    #[error("derivative cache write failed: {0}")]
    CacheWriteFailed(String),

    #[error("resize failed: {0}")]
    ResizeFailed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match &error {
            EngineError::SourceNotFound(_) => Self::new(StatusCode::NOT_FOUND, &error.to_string()),
            EngineError::UnsupportedFormat(_) => {
                Self::new(StatusCode::BAD_REQUEST, &error.to_string())
            }
            EngineError::ConversionFailed { .. } => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, &error.to_string())
            }
            EngineError::CacheWriteFailed(_) | EngineError::ResizeFailed(_) => {
                // Non-fatal by contract; reaching the boundary means a caller
                // failed to degrade.
                tracing::warn!(error = ?error, "non-fatal engine error escaped to http boundary");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "request failed")
            }
            EngineError::Internal(source) => {
                tracing::warn!(error = ?source, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "request failed")
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::warn!(error = ?error, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "request failed")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
