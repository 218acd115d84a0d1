//! Progress / activity tracker — purely reactive aggregation of loop,
//! tool, and orchestrator events for UI consumers (terminal status line,
//! HTTP progress endpoint, SSE).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use osa_bus::{topics, EventBus, HandlerMode};

#[derive(Debug, Clone, Serialize, Default)]
pub struct AgentSummary {
    pub name: String,
    pub status: String,
    pub tool_uses: u32,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub elapsed_ms: u64,
    pub tool_count: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub current_action: String,
    pub agent_summaries: Vec<AgentSummary>,
}

#[derive(Default)]
struct SessionProgress {
    started_at: Option<Instant>,
    tool_count: u32,
    input_tokens: u64,
    output_tokens: u64,
    current_action: String,
    agents: HashMap<String, AgentSummary>,
}

/// Subscribes to `tool_call`, `llm_response`, and `system_event`
/// (orchestrator tags) and maintains per-session counters.
pub struct ProgressTracker {
    sessions: Arc<RwLock<HashMap<String, SessionProgress>>>,
}

impl ProgressTracker {
    /// Create the tracker and attach its bus subscriptions.
    pub fn attach(bus: &EventBus) -> Arc<Self> {
        let tracker = Arc::new(Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        });

        {
            let sessions = tracker.sessions.clone();
            bus.subscribe(topics::LLM_REQUEST, HandlerMode::Sync, move |payload| {
                let Some(sid) = session_of(payload) else { return };
                let mut map = sessions.write();
                let p = map.entry(sid).or_default();
                p.started_at.get_or_insert_with(Instant::now);
                p.current_action = "thinking".into();
            });
        }
        {
            let sessions = tracker.sessions.clone();
            bus.subscribe(topics::LLM_RESPONSE, HandlerMode::Sync, move |payload| {
                let Some(sid) = session_of(payload) else { return };
                let mut map = sessions.write();
                let p = map.entry(sid).or_default();
                p.input_tokens += payload
                    .pointer("/usage/input_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                p.output_tokens += payload
                    .pointer("/usage/output_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
            });
        }
        {
            let sessions = tracker.sessions.clone();
            bus.subscribe(topics::TOOL_CALL, HandlerMode::Sync, move |payload| {
                let Some(sid) = session_of(payload) else { return };
                let phase = payload.get("phase").and_then(|v| v.as_str()).unwrap_or("");
                let name = payload.get("name").and_then(|v| v.as_str()).unwrap_or("?");
                let mut map = sessions.write();
                let p = map.entry(sid).or_default();
                match phase {
                    "start" => p.current_action = format!("tool: {name}"),
                    "end" => {
                        p.tool_count += 1;
                        p.current_action = "thinking".into();
                    }
                    _ => {}
                }
            });
        }
        {
            let sessions = tracker.sessions.clone();
            bus.subscribe(topics::AGENT_RESPONSE, HandlerMode::Sync, move |payload| {
                let Some(sid) = session_of(payload) else { return };
                if let Some(p) = sessions.write().get_mut(&sid) {
                    p.current_action = "idle".into();
                }
            });
        }
        {
            let sessions = tracker.sessions.clone();
            bus.subscribe(topics::SYSTEM_EVENT, HandlerMode::Sync, move |payload| {
                let tag = payload.get("event").and_then(|v| v.as_str()).unwrap_or("");
                if !tag.starts_with("orchestrator_agent") {
                    return;
                }
                let Some(sid) = session_of(payload) else { return };
                let Some(agent_id) = payload.get("agent_id").and_then(|v| v.as_str()) else {
                    return;
                };
                let mut map = sessions.write();
                let p = map.entry(sid).or_default();
                let entry = p.agents.entry(agent_id.to_owned()).or_default();
                if let Some(name) = payload.get("name").and_then(|v| v.as_str()) {
                    entry.name = name.to_owned();
                }
                match tag {
                    "orchestrator_agent_started" => entry.status = "running".into(),
                    "orchestrator_agent_completed" => entry.status = "completed".into(),
                    "orchestrator_agent_failed" => entry.status = "failed".into(),
                    "orchestrator_agent_progress" => {
                        entry.tool_uses = payload
                            .get("tool_uses")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0) as u32;
                        entry.tokens_used = payload
                            .get("tokens_used")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0);
                    }
                    _ => {}
                }
            });
        }

        tracker
    }

    pub fn snapshot(&self, session_id: &str) -> ProgressSnapshot {
        let map = self.sessions.read();
        match map.get(session_id) {
            Some(p) => {
                let mut agent_summaries: Vec<AgentSummary> = p.agents.values().cloned().collect();
                agent_summaries.sort_by(|a, b| a.name.cmp(&b.name));
                ProgressSnapshot {
                    session_id: session_id.to_owned(),
                    elapsed_ms: p
                        .started_at
                        .map(|t| t.elapsed().as_millis() as u64)
                        .unwrap_or(0),
                    tool_count: p.tool_count,
                    input_tokens: p.input_tokens,
                    output_tokens: p.output_tokens,
                    current_action: p.current_action.clone(),
                    agent_summaries,
                }
            }
            None => ProgressSnapshot {
                session_id: session_id.to_owned(),
                elapsed_ms: 0,
                tool_count: 0,
                input_tokens: 0,
                output_tokens: 0,
                current_action: "idle".into(),
                agent_summaries: Vec::new(),
            },
        }
    }
}

fn session_of(payload: &Value) -> Option<String> {
    payload
        .get("session_id")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}
