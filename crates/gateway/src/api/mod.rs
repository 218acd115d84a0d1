//! HTTP API surface.

pub mod auth;
pub mod classify;
pub mod error;
pub mod health;
pub mod orchestrate;
pub mod stream;
pub mod tools;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/orchestrate", post(orchestrate::orchestrate))
        .route("/orchestrate/:task_id/progress", get(orchestrate::task_progress))
        .route("/orchestrate/tasks", get(orchestrate::list_tasks))
        .route("/stream/:session_id", get(stream::stream))
        .route("/classify", post(classify::classify))
        .route("/tools", get(tools::list_tools))
        .route("/tools/:name/execute", post(tools::execute_tool))
        .route("/progress/:session_id", get(orchestrate::session_progress))
        .route("/health", get(health::health))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_token,
        ));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind, "HTTP gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
