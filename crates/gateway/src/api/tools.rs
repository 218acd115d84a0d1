//! Tool listing, search, and direct execution endpoints.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use osa_tools::ToolOutcome;

use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Optional relevance search over names and descriptions.
    #[serde(default)]
    pub q: Option<String>,
}

pub async fn list_tools(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    if let Some(q) = query.q.filter(|q| !q.is_empty()) {
        let results: Vec<serde_json::Value> = state
            .rt
            .tools
            .search(&q)
            .into_iter()
            .map(|(name, description, relevance)| {
                serde_json::json!({
                    "name": name,
                    "description": description,
                    "relevance": relevance,
                })
            })
            .collect();
        return Json(serde_json::json!({ "tools": results, "count": results.len() }));
    }

    let tools = state.rt.tools.list_tools();
    Json(serde_json::json!({ "count": tools.len(), "tools": tools }))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub arguments: serde_json::Value,
}

pub async fn execute_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let args = if body.arguments.is_null() {
        serde_json::json!({})
    } else {
        body.arguments
    };

    match state.rt.tools.execute(&name, args).await {
        ToolOutcome::Ok(result) => Ok(Json(serde_json::json!({
            "tool": name,
            "status": "ok",
            "result": result,
        }))),
        ToolOutcome::Error(details) => Err(ApiError::tool_error(details)),
    }
}
