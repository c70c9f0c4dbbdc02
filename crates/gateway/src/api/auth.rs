//! Bearer-token middleware for the operator and playback routes.
//!
//! The token is read from the env var named by `server.api_token_env`
//! once at startup; only its SHA-256 digest is kept. No token means dev
//! mode: every request passes.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::api_error;
use crate::state::AppState;

/// Digest of a configured token. Blank tokens count as unset.
pub fn token_digest(raw: Option<&str>) -> Option<Vec<u8>> {
    let raw = raw.map(str::trim).filter(|t| !t.is_empty())?;
    Some(Sha256::digest(raw.as_bytes()).to_vec())
}

/// Compare digests rather than tokens so the check leaks no length.
fn token_matches(provided: &str, expected: &[u8]) -> bool {
    Sha256::digest(provided.as_bytes()).ct_eq(expected).into()
}

pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_token_hash.as_deref() else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if !token_matches(provided, expected) {
        tracing::debug!(path = %req.uri().path(), "rejected request without valid token");
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing API token");
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_token_is_dev_mode() {
        assert!(token_digest(None).is_none());
        assert!(token_digest(Some("   ")).is_none());
    }

    #[test]
    fn digest_round_trip() {
        let d = token_digest(Some("s3cret")).unwrap();
        assert!(token_matches("s3cret", &d));
        assert!(!token_matches("s3cre", &d));
        assert!(!token_matches("", &d));
    }
}
