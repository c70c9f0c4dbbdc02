pub mod auth;
pub mod conversations;
pub mod health;
pub mod messages;
pub mod playback;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use solace_domain::error::Error;

use crate::state::AppState;

/// Build the API router.
///
/// Health and readiness are public; everything else sits behind the
/// bearer-token middleware.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/readiness", get(health::readiness));

    let protected = Router::new()
        // Operator actions
        .route("/v1/conversations/cleanup", post(conversations::cleanup))
        .route("/v1/conversations/:id/summarize", post(conversations::summarize))
        // Lazy speech playback
        .route("/v1/tts-stream/:message_id", get(playback::stream))
        // Rewind a user turn
        .route("/v1/messages/:id/edit", post(messages::edit))
        .route("/v1/messages/:id/regenerate", post(messages::regenerate))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected).layer(TraceLayer::new_for_http())
}

/// `{"error": "..."}` with an explicit status.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Map a domain error onto a status code.
pub(crate) fn error_response(e: &Error) -> Response {
    let status = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Provider { .. } | Error::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}
