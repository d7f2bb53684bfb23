//! Error types for the Mocri server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;
use crate::models::{RegistryError, ResolveError};
use crate::pipeline::PipelineError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Pipeline(e) => classify_pipeline(e),
        }
    }
}

fn classify_pipeline(error: &PipelineError) -> (StatusCode, &'static str, String) {
    match error {
        PipelineError::Decode(_) => (StatusCode::BAD_REQUEST, "invalid_image", error.to_string()),
        PipelineError::InvalidBox(_) => (StatusCode::BAD_REQUEST, "bad_request", error.to_string()),
        PipelineError::Resolve(e) => {
            tracing::warn!(model = e.model(), "Model resolution failed: {}", e);
            match e {
                ResolveError::InvalidName { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_model_name", e.to_string())
                }
                e if e.is_not_found() => (StatusCode::NOT_FOUND, "model_not_found", e.to_string()),
                ResolveError::Download { source, .. } => {
                    let status = match source {
                        RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
                        _ => StatusCode::BAD_GATEWAY,
                    };
                    (status, "model_download_failed", e.to_string())
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "model_unavailable", e.to_string()),
            }
        }
        PipelineError::Engine(e) if e.is_input_error() => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_parameters", e.to_string())
        }
        PipelineError::Engine(e @ EngineError::Unavailable(_)) => {
            tracing::error!("Engine unavailable: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "engine_unavailable", e.to_string())
        }
        PipelineError::Engine(e) => {
            tracing::error!("Engine error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "engine_error", e.to_string())
        }
        PipelineError::Encode(_) | PipelineError::Task(_) => {
            tracing::error!("Pipeline error: {}", error);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            )
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = self.classify();

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
