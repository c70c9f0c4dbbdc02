use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;

use super::{api_error, error_response};
use crate::runtime::{reaper, summarize};
use crate::state::AppState;

/// `POST /v1/conversations/:id/summarize`
///
/// Too few turns is not an error; `summary` is then `null`.
pub async fn summarize(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match summarize::summarize_existing(&state, &id).await {
        Ok(summary) => Json(serde_json::json!({
            "status": "ok",
            "summary": summary,
        }))
        .into_response(),
        Err(e @ solace_domain::error::Error::NotFound(_)) => error_response(&e),
        Err(e) => {
            tracing::error!(conversation_id = %id, error = %e, "summarize failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `POST /v1/conversations/cleanup`
pub async fn cleanup(State(state): State<AppState>) -> Response {
    match reaper::close_idle(&state, Utc::now()).await {
        Ok(closed) => Json(serde_json::json!({
            "status": "ok",
            "closed": closed,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "cleanup failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
