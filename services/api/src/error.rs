//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and how each
//! error is turned into an HTTP response.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use revision_core::{ports::PortError, EngineError};
use serde_json::json;
use tracing::error;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// An engine operation was refused or failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error while running the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request itself could not be understood.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The caller could not be identified.
    #[error("Unauthorized")]
    Unauthorized,

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

fn internal() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal_error", "message": "Internal server error" })),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let engine = match self {
            ApiError::Engine(e) => e,
            ApiError::BadRequest(message) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid_request", "message": message })),
                )
                    .into_response()
            }
            ApiError::Unauthorized => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "unauthorized", "message": "Authentication required" })),
                )
                    .into_response()
            }
            other => {
                error!("Request failed: {}", other);
                return internal();
            }
        };

        match engine {
            EngineError::QuotaExceeded { content_type, limit } => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": "quota_exceeded",
                    "message": format!("Daily free {} limit reached", content_type),
                    "content_type": content_type.as_str(),
                    "limit": limit,
                    "needs_subscription": true,
                })),
            )
                .into_response(),
            EngineError::InvalidRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_request", "message": message })),
            )
                .into_response(),
            EngineError::MalformedContent(detail) | EngineError::Generator(detail) => {
                error!("Generation failed: {}", detail);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "generation_failed", "message": "Failed to generate content, please try again" })),
                )
                    .into_response()
            }
            EngineError::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "forbidden", "message": "Forbidden" })),
            )
                .into_response(),
            EngineError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not_found", "message": message })),
            )
                .into_response(),
            EngineError::AlreadySubmitted | EngineError::AlreadyGraded => {
                let message = engine.to_string();
                (
                    StatusCode::CONFLICT,
                    Json(json!({ "error": "conflict", "message": message })),
                )
                    .into_response()
            }
            EngineError::Internal(e) => {
                error!("Store failure: {}", e);
                internal()
            }
        }
    }
}
