//! `GET /api/v1/stream/:session_id` — SSE over the event bus.
//!
//! Sends `event: connected` on open, then one SSE event per bus event
//! for the session, with a keep-alive comment every 30 seconds. Access
//! control fails closed: an owned session without valid auth is a 404,
//! indistinguishable from a missing one.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_core::Stream;
use tokio::sync::mpsc;

use osa_bus::{topics, EventBus, HandlerMode, SubscriptionId};

use crate::api::auth::is_authenticated;
use crate::api::error::ApiError;
use crate::state::AppState;

const STREAM_TOPICS: &[&str] = &[
    topics::AGENT_RESPONSE,
    topics::TOOL_CALL,
    topics::LLM_REQUEST,
    topics::LLM_RESPONSE,
    topics::SYSTEM_EVENT,
];

/// Unsubscribes all forwarding handlers when the client goes away.
struct SubscriptionGuard {
    bus: EventBus,
    ids: Vec<SubscriptionId>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

pub async fn stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    // Owner check, fail closed: anonymous sessions are public; a session
    // with an owner requires a valid token.
    if let Some(owner) = state.rt.sessions.owner_of(&session_id) {
        if owner.is_some() && !is_authenticated(&headers, &state) {
            return Err(ApiError::not_found(format!("session {session_id}")));
        }
    }

    let (tx, rx) = mpsc::channel::<(String, serde_json::Value)>(256);
    let mut ids = Vec::new();
    for &topic in STREAM_TOPICS {
        let tx = tx.clone();
        let session_filter = session_id.clone();
        let topic_name = topic.to_owned();
        ids.push(state.rt.bus.subscribe(topic, HandlerMode::Sync, move |payload| {
            let matches = payload
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(|sid| sid == session_filter)
                .unwrap_or(false);
            if matches {
                // Drop on overflow rather than block the publisher.
                let _ = tx.try_send((topic_name.clone(), payload.clone()));
            }
        }));
    }
    let guard = SubscriptionGuard {
        bus: state.rt.bus.clone(),
        ids,
    };

    Ok(Sse::new(event_stream(session_id, rx, guard))
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(30))
                .text("keep-alive"),
        ))
}

fn event_stream(
    session_id: String,
    mut rx: mpsc::Receiver<(String, serde_json::Value)>,
    guard: SubscriptionGuard,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        yield Ok(Event::default()
            .event("connected")
            .data(serde_json::json!({ "session_id": session_id }).to_string()));

        while let Some((topic, payload)) = rx.recv().await {
            // system_event entries carry their specific tag as the SSE
            // event type.
            let event_type = if topic == topics::SYSTEM_EVENT {
                payload
                    .get("event")
                    .and_then(|v| v.as_str())
                    .unwrap_or("system_event")
                    .to_owned()
            } else {
                topic
            };
            yield Ok(Event::default()
                .event(event_type)
                .data(payload.to_string()));
        }
        // guard dropped here → handlers unsubscribed.
        drop(guard);
    }
}
