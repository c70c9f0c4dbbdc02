use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::api_error;
use crate::runtime::speech::{self, PlaybackError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SnippetQuery {
    #[serde(default)]
    pub snippet: usize,
}

impl PlaybackError {
    pub fn status(&self) -> StatusCode {
        match self {
            PlaybackError::NotFound(_) => StatusCode::NOT_FOUND,
            PlaybackError::OutOfRange { .. } => StatusCode::BAD_REQUEST,
            PlaybackError::VoiceDisabled => StatusCode::FORBIDDEN,
            PlaybackError::NoVoice | PlaybackError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PlaybackError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for PlaybackError {
    fn into_response(self) -> Response {
        if !self.is_client_error() {
            tracing::error!(error = %self, "playback failed");
        }
        api_error(self.status(), self.to_string())
    }
}

/// `GET /v1/tts-stream/:message_id?snippet=N`: one sentence as streamed
/// `audio/mpeg`.
pub async fn stream(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Query(q): Query<SnippetQuery>,
) -> Result<Response, PlaybackError> {
    let snippet = speech::prepare_snippet(&state, &message_id, q.snippet).await?;
    tracing::debug!(
        message_id = %message_id,
        snippet = snippet.index,
        of = snippet.count,
        "streaming snippet"
    );
    let audio = speech::stream_snippet(&state, snippet).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Body::from_stream(audio),
    )
        .into_response())
}
