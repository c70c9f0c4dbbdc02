use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use super::error_response;
use crate::runtime::edit;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub transcription: String,
}

/// `POST /v1/messages/:id/edit`
pub async fn edit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EditRequest>,
) -> Response {
    match edit::edit_message(&state, &id, &body.transcription).await {
        Ok(row) => Json(serde_json::json!({ "status": "ok", "message": row })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /v1/messages/:id/regenerate`
pub async fn regenerate(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match edit::regenerate(&state, &id).await {
        Ok(row) => Json(serde_json::json!({ "status": "ok", "message": row })).into_response(),
        Err(e) => error_response(&e),
    }
}
