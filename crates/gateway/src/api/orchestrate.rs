//! `POST /api/v1/orchestrate` — the primary message ingress — and task
//! progress queries.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use osa_domain::signal::ChannelKind;
use osa_runtime::{respond, ProcessOpts, RespondOutcome};

use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OrchestrateRequest {
    pub input: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Defaults to blocking; `false` returns `202 {task_id}` for complex
    /// tasks and still blocks for simple ones.
    #[serde(default = "default_blocking")]
    pub blocking: bool,
    #[serde(default)]
    pub skip_plan: bool,
    #[serde(default)]
    pub approved_plan: Option<String>,
}

fn default_blocking() -> bool {
    true
}

pub async fn orchestrate(
    State(state): State<AppState>,
    Json(body): Json<OrchestrateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.input.trim().is_empty() {
        return Err(ApiError::invalid("input must not be empty"));
    }
    let session_id = body
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let opts = ProcessOpts {
        channel: ChannelKind::Http,
        user_id: body.user_id.clone(),
        skip_plan: body.skip_plan,
        approved_plan: body.approved_plan.clone(),
        ..Default::default()
    };

    let started = std::time::Instant::now();
    let outcome = respond(
        &state.rt,
        &state.orchestrator,
        &session_id,
        &body.input,
        opts,
        body.blocking,
    )
    .await?;

    let signal = state
        .rt
        .sessions
        .get(&session_id)
        .and_then(|s| s.lock().current_signal.clone());

    Ok(match outcome {
        RespondOutcome::Answer(output) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "session_id": session_id,
                "output": output,
                "signal": signal,
                "execution_ms": started.elapsed().as_millis() as u64,
            })),
        ),
        RespondOutcome::Plan { text, signal } => (
            StatusCode::OK,
            Json(serde_json::json!({
                "session_id": session_id,
                "plan": text,
                "signal": signal,
                "status": "plan_pending",
            })),
        ),
        RespondOutcome::Task { task_id } => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "session_id": session_id,
                "task_id": task_id,
                "status": "running",
            })),
        ),
    })
}

pub async fn task_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id: uuid::Uuid = task_id
        .parse()
        .map_err(|_| ApiError::invalid("task_id must be a UUID"))?;
    let snapshot = state
        .orchestrator
        .progress(&task_id)
        .ok_or_else(|| ApiError::not_found(format!("task {task_id}")))?;
    Ok(Json(serde_json::json!({ "task": snapshot })))
}

pub async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    let tasks = state.orchestrator.list_tasks();
    Json(serde_json::json!({ "count": tasks.len(), "tasks": tasks }))
}

pub async fn session_progress(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "progress": state.progress.snapshot(&session_id) }))
}
