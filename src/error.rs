use crate::fcm_sender::FcmError;
use crate::payload::PayloadError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bb8_redis::redis::RedisError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("FCM error: {0}")]
    Fcm(#[from] FcmError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        // Validation and not-found short-circuit with just a message; anything
        // else is an unexpected datastore/gateway failure and surfaces the
        // underlying detail alongside a generic message.
        match self {
            ServiceError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "message": msg })),
            )
                .into_response(),
            ServiceError::Payload(e) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "message": e.to_string() })),
            )
                .into_response(),
            ServiceError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "message": msg })),
            )
                .into_response(),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "message": "Failed to send notification",
                    "error": other.to_string(),
                })),
            )
                .into_response(),
        }
    }
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
