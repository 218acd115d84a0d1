//! HTTP surface tests driven through the axum router with the scripted
//! provider — no network, no real LLM.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use osa_domain::config::Config;
use osa_providers::{ProviderRegistry, ScriptedProvider, Step};
use osa_runtime::{AgentRuntime, Orchestrator, ProgressTracker};

use osa_gateway::api;
use osa_gateway::state::AppState;

fn app_state(dir: &std::path::Path, steps: Vec<Step>, token_hash: Option<Vec<u8>>) -> AppState {
    let mut config = Config::default();
    config.state_dir = Some(dir.to_path_buf());
    config.classifier.llm_enabled = false;
    config.orchestrator.appraisal_enabled = false;

    let scripted = ScriptedProvider::new(steps);
    let providers = ProviderRegistry::single("scripted", Arc::new(scripted));
    let rt = AgentRuntime::bootstrap(config, providers).unwrap();
    let progress = ProgressTracker::attach(&rt.bus);
    let orchestrator = Arc::new(Orchestrator::new(rt.clone()));
    AppState {
        rt,
        orchestrator,
        progress,
        api_token_hash: token_hash,
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn classify_endpoint_returns_signal_json() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(app_state(dir.path(), vec![], None));

    let response = app
        .oneshot(post_json(
            "/api/v1/classify",
            serde_json::json!({"message": "fix the login crash", "channel": "http"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["signal"]["mode"], "maintain");
    assert_eq!(json["signal"]["format"], "message");
    assert_eq!(json["signal"]["confidence"], "low");
    let weight = json["signal"]["weight"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&weight));
}

#[tokio::test]
async fn classify_rejects_empty_message() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(app_state(dir.path(), vec![], None));
    let response = app
        .oneshot(post_json(
            "/api/v1/classify",
            serde_json::json!({"message": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn tools_list_and_execute() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(app_state(dir.path(), vec![], None));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/tools")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["count"].as_u64().unwrap() >= 4);
    let names: Vec<&str> = json["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"echo"));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/tools/echo/execute",
            serde_json::json!({"arguments": {"text": "ping"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["result"], "ping");

    // Tool errors map to 422 with the envelope.
    let response = app
        .oneshot(post_json(
            "/api/v1/tools/nope/execute",
            serde_json::json!({"arguments": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error"], "tool_error");
    assert!(json["details"].as_str().unwrap().contains("unknown tool"));
}

#[tokio::test]
async fn orchestrate_blocking_simple_path() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(app_state(
        dir.path(),
        vec![Step::text("the answer")],
        None,
    ));

    let response = app
        .oneshot(post_json(
            "/api/v1/orchestrate",
            serde_json::json!({"input": "what's the time?", "session_id": "s-http"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["session_id"], "s-http");
    assert_eq!(json["output"], "the answer");
    assert!(json["execution_ms"].as_u64().is_some());
    assert_eq!(json["signal"]["type"], "question");
}

#[tokio::test]
async fn task_progress_unknown_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(app_state(dir.path(), vec![], None));
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/v1/orchestrate/{}/progress",
                    uuid::Uuid::new_v4()
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn auth_enforced_when_token_configured() {
    use sha2::Digest;
    let dir = tempfile::tempdir().unwrap();
    let hash = sha2::Sha256::digest(b"secret-token").to_vec();
    let app = api::router(app_state(dir.path(), vec![], Some(hash)));

    // Without the token → 401.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/tools")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // With it → 200.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/tools")
                .header("authorization", "Bearer secret-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_reports_providers_and_tools() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(app_state(dir.path(), vec![], None));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["providers"][0], "scripted");
}

#[tokio::test]
async fn owned_session_stream_fails_closed_without_auth() {
    use sha2::Digest;
    let dir = tempfile::tempdir().unwrap();
    let hash = sha2::Sha256::digest(b"tok").to_vec();
    let state = app_state(dir.path(), vec![], Some(hash));

    // Create a session owned by a user.
    state
        .rt
        .sessions
        .ensure_session("owned", osa_domain::ChannelKind::Http, Some("alice".into()));

    let app = api::router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/stream/owned")
                // Token passes the global middleware but the owner check
                // still requires it; strip it to prove fail-closed.
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    // Wrong token is caught by the middleware first (401); the dedicated
    // owner check path is covered below via anonymous access.
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn owned_session_is_invisible_without_credentials() {
    // No auth configured at all: an owned session must still fail
    // closed as 404, indistinguishable from a missing session.
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(dir.path(), vec![], None);
    state
        .rt
        .sessions
        .ensure_session("owned2", osa_domain::ChannelKind::Http, Some("bob".into()));

    let app = api::router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/stream/owned2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn anonymous_session_stream_sends_connected_event() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(dir.path(), vec![], None);
    state
        .rt
        .sessions
        .ensure_session("anon", osa_domain::ChannelKind::Http, None);

    let app = api::router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/stream/anon")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(content_type.starts_with("text/event-stream"));

    // First frame is the connected event.
    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8_lossy(frame.data_ref().unwrap()).to_string();
    assert!(text.contains("event: connected"));
    assert!(text.contains("anon"));
}
