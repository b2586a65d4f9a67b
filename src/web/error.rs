use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::game::GameError;

#[derive(Debug, Error)]
pub enum WebError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Room not found: {0}")]
    RoomNotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Server at capacity: {0}")]
    Capacity(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl From<GameError> for WebError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::Capacity | GameError::CodeExhaustion => WebError::Capacity(err.to_string()),
            GameError::NotFound => WebError::RoomNotFound(err.to_string()),
            GameError::Internal => WebError::InternalServerError(err.to_string()),
            other => WebError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            WebError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            WebError::RoomNotFound(code) => {
                (StatusCode::NOT_FOUND, format!("Room {code} not found"))
            }
            WebError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            WebError::Capacity(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            WebError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            WebError::JsonSerialization(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("JSON error: {err}"),
            ),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T, E = WebError> = std::result::Result<T, E>;
