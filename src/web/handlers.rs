use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Deserialize;

use super::error::{Result as WebResult, WebError};
use crate::game::session::RoomSummary;
use crate::registry::RoomDetails;
use crate::state::AppState;

#[derive(Deserialize, Debug)]
pub struct CreateRoomRequest {
    pub identity: String,
    pub name: String,
}

/// Out-of-band room creation; the creator then attaches their socket
/// with a `Reconnect` handshake.
pub async fn create_room_handler(
    State(app_state): State<AppState>,
    Json(payload): Json<CreateRoomRequest>,
) -> WebResult<Json<RoomDetails>> {
    tracing::info!("HTTP: Received create_room request");

    let (details, _handle) = app_state
        .rooms
        .create_room(payload.identity, payload.name)
        .await
        .map_err(WebError::from)?;

    Ok(Json(details))
}

/// Join-screen probe: does this code exist, and can it still be joined?
pub async fn room_summary_handler(
    State(app_state): State<AppState>,
    Path(code): Path<String>,
) -> WebResult<Json<RoomSummary>> {
    let handle = app_state
        .rooms
        .get_room(&code)
        .await
        .ok_or_else(|| WebError::RoomNotFound(code.clone()))?;

    let summary = handle
        .summary()
        .await
        .ok_or_else(|| WebError::RoomNotFound(code))?;

    Ok(Json(summary))
}

pub async fn refresh_words_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> WebResult<StatusCode> {
    tracing::info!("HTTP: Received refresh_words request");

    // admin_api_key is guaranteed to be non-empty if the app started.
    let expected_key = &app_state.settings.server.admin_api_key;

    match headers.get(http::header::AUTHORIZATION) {
        Some(auth_header_val) => {
            let auth_header_str = auth_header_val.to_str().unwrap_or("");
            if let Some(provided_key) = auth_header_str.strip_prefix("ApiKey ") {
                if provided_key.trim() != expected_key.as_str() {
                    tracing::warn!(
                        "Unauthorized attempt to refresh words: Invalid API key provided."
                    );
                    return Err(WebError::Unauthorized("Invalid API key".to_string()));
                }
            } else {
                tracing::warn!(
                    "Unauthorized attempt to refresh words: Authorization header format incorrect. Expected 'ApiKey <key>'."
                );
                return Err(WebError::Unauthorized(
                    "Invalid Authorization header format. Expected 'ApiKey <key>'".to_string(),
                ));
            }
        }
        None => {
            tracing::warn!("Unauthorized attempt to refresh words: Missing Authorization header.");
            return Err(WebError::Unauthorized(
                "Missing Authorization header".to_string(),
            ));
        }
    }

    app_state.catalog.refresh().await.map_err(|e| {
        tracing::error!("Failed to refresh word catalog: {:?}", e);
        WebError::InternalServerError(format!("Failed to refresh word catalog: {e}"))
    })?;

    Ok(StatusCode::OK)
}
