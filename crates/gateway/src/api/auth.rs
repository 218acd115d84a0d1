//! Bearer-token middleware.
//!
//! The token is read from the configured env var once at startup and
//! kept only as a SHA-256 digest; requests are compared in constant
//! time. When auth is not required the middleware passes everything
//! through (anonymous mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash to a fixed length first so the comparison leaks neither
    // content nor length.
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": "unauthorized",
                "details": "missing or invalid API token",
            })),
        )
            .into_response();
    }

    next.run(req).await
}

/// Whether this request carries a valid bearer token (used by the SSE
/// owner check, which fails closed to 404 rather than 401).
pub fn is_authenticated(headers: &axum::http::HeaderMap, state: &AppState) -> bool {
    let Some(expected) = &state.api_token_hash else {
        return false;
    };
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    let provided_hash = Sha256::digest(provided.as_bytes());
    bool::from(provided_hash.ct_eq(expected.as_slice()))
}
