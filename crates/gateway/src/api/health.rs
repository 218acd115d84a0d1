//! `GET /api/v1/health` — liveness plus provider readiness.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let init_errors: Vec<serde_json::Value> = state
        .rt
        .providers
        .init_errors()
        .iter()
        .map(|e| {
            serde_json::json!({
                "provider_id": e.provider_id,
                "kind": e.kind,
                "error": e.error,
            })
        })
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "providers": state.rt.providers.list_providers(),
        "provider_init_errors": init_errors,
        "sessions": state.rt.sessions.len(),
        "tools": state.rt.tools.list_tools().len(),
    }))
}
