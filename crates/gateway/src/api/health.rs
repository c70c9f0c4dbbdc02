use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Store reachable and at least one LLM provider registered.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.ping().await;
    let providers = state.llm.len();
    let ready = store.is_ok() && providers > 0;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "ready": ready,
            "store": match store {
                Ok(()) => "ok".to_owned(),
                Err(e) => e.to_string(),
            },
            "providers": providers,
            "in_flight": state.in_flight.len(),
        })),
    )
}
