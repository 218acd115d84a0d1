//! Context-pressure detection and conversation compaction.
//!
//! Thresholds apply to conversation-only tokens against the conversation
//! budget (`max_context_tokens − response_reserve`). Hard and soft
//! levels replace the oldest slice of messages with a single
//! LLM-generated summary system message; pressure and warm levels only
//! emit events. The latest user message is always preserved verbatim.

use std::sync::Arc;

use osa_bus::EventBus;
use osa_context::estimate_tokens_messages;
use osa_domain::config::{CompactionConfig, ContextConfig};
use osa_domain::message::{Message, Role};
use osa_providers::{ChatRequest, ProviderRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    None,
    /// ≥ 50%: UI hint only.
    Warm,
    /// ≥ 70%: `context_pressure` system event, no mutation.
    Pressure,
    /// ≥ 85%: replace the oldest ~50%.
    Soft,
    /// ≥ 95%: replace the oldest ~70%.
    Hard,
}

pub struct Compactor {
    config: CompactionConfig,
    context: ContextConfig,
    providers: Arc<ProviderRegistry>,
}

impl Compactor {
    pub fn new(
        config: CompactionConfig,
        context: ContextConfig,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            config,
            context,
            providers,
        }
    }

    fn conversation_budget(&self) -> usize {
        self.context
            .max_context_tokens
            .saturating_sub(self.context.response_reserve)
            .max(1)
    }

    pub fn level(&self, messages: &[Message]) -> PressureLevel {
        let used = estimate_tokens_messages(messages) as f64;
        let ratio = used / self.conversation_budget() as f64;
        if ratio >= self.config.hard_threshold {
            PressureLevel::Hard
        } else if ratio >= self.config.soft_threshold {
            PressureLevel::Soft
        } else if ratio >= self.config.pressure_threshold {
            PressureLevel::Pressure
        } else if ratio >= self.config.warm_threshold {
            PressureLevel::Warm
        } else {
            PressureLevel::None
        }
    }

    /// Run the threshold check and compact when warranted. Returns the
    /// (possibly unchanged) message list.
    pub async fn maybe_compact(
        &self,
        session_id: &str,
        messages: Vec<Message>,
        bus: &EventBus,
    ) -> Vec<Message> {
        match self.level(&messages) {
            PressureLevel::None => messages,
            PressureLevel::Warm => {
                bus.emit_system(
                    "context_warm",
                    serde_json::json!({ "session_id": session_id }),
                );
                messages
            }
            PressureLevel::Pressure => {
                bus.emit_system(
                    "context_pressure",
                    serde_json::json!({
                        "session_id": session_id,
                        "tokens": estimate_tokens_messages(&messages),
                    }),
                );
                messages
            }
            PressureLevel::Soft => {
                self.compact(session_id, messages, self.config.soft_drop_fraction, bus)
                    .await
            }
            PressureLevel::Hard => {
                self.compact(session_id, messages, self.config.hard_drop_fraction, bus)
                    .await
            }
        }
    }

    /// Unconditional compaction at the hard fraction — the loop's
    /// response to a provider `context_overflow`.
    pub async fn force_compact(
        &self,
        session_id: &str,
        messages: Vec<Message>,
        bus: &EventBus,
    ) -> Vec<Message> {
        self.compact(session_id, messages, self.config.hard_drop_fraction, bus)
            .await
    }

    async fn compact(
        &self,
        session_id: &str,
        messages: Vec<Message>,
        drop_fraction: f64,
        bus: &EventBus,
    ) -> Vec<Message> {
        let split = split_point(&messages, drop_fraction);
        if split == 0 {
            return messages;
        }
        let (old, kept) = messages.split_at(split);

        let before_tokens = estimate_tokens_messages(&messages);

        let summary = match self.summarize(old).await {
            Ok(s) => s,
            Err(e) => {
                // Never silent: fall back to dropping the oldest 50%.
                tracing::warn!(
                    session_id,
                    error = %e,
                    "compaction summary failed, dropping oldest messages verbatim"
                );
                let fallback_split = split_point(&messages, 0.5);
                let kept = messages[fallback_split..].to_vec();
                bus.emit_system(
                    "context_compacted",
                    serde_json::json!({
                        "session_id": session_id,
                        "mode": "drop_fallback",
                        "dropped": fallback_split,
                    }),
                );
                return kept;
            }
        };

        let mut compacted = Vec::with_capacity(kept.len() + 1);
        compacted.push(Message::system(format!(
            "[conversation summary]\n{summary}"
        )));
        compacted.extend_from_slice(kept);

        bus.emit_system(
            "context_compacted",
            serde_json::json!({
                "session_id": session_id,
                "mode": "summary",
                "replaced": split,
                "tokens_before": before_tokens,
                "tokens_after": estimate_tokens_messages(&compacted),
            }),
        );
        tracing::info!(session_id, replaced = split, "conversation compacted");
        compacted
    }

    async fn summarize(&self, old: &[Message]) -> osa_domain::Result<String> {
        let conversation = render_conversation(old);
        let prompt = format!(
            "Summarize this conversation history for continuity. Preserve \
             decisions made, tool outcomes, and open questions. Be concise; \
             write in present tense; omit pleasantries.\n\n\
             CONVERSATION:\n{conversation}"
        );
        let req = ChatRequest {
            messages: vec![Message::user(prompt)],
            temperature: Some(0.1),
            max_tokens: Some(1_500),
            ..Default::default()
        };
        let resp = self.providers.chat(req).await?;
        Ok(resp.content)
    }
}

/// Index separating the slice to replace from the slice to keep. Never
/// cuts after the latest user message, which must survive verbatim.
fn split_point(messages: &[Message], drop_fraction: f64) -> usize {
    if messages.len() < 4 {
        return 0;
    }
    let mut split = (messages.len() as f64 * drop_fraction) as usize;

    if let Some(last_user) = messages.iter().rposition(|m| m.role == Role::User) {
        split = split.min(last_user);
    }

    // Don't cut between an assistant tool_call message and its tool
    // results — the orphaned results would violate the pairing invariant.
    while split > 0 && messages[split].role == Role::Tool {
        split -= 1;
    }
    split
}

fn render_conversation(messages: &[Message]) -> String {
    let mut buf = String::new();
    for m in messages {
        let label = match m.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
            Role::System => "System",
        };
        buf.push_str(label);
        buf.push_str(": ");
        let text = m.text();
        // Long tool outputs get clipped so the summary prompt stays sane.
        if text.len() > 2_000 {
            buf.push_str(&text[..1_000]);
            buf.push_str(" [...] ");
        } else {
            buf.push_str(text);
        }
        if !m.tool_calls.is_empty() {
            let names: Vec<&str> = m.tool_calls.iter().map(|tc| tc.name.as_str()).collect();
            buf.push_str(&format!(" [called: {}]", names.join(", ")));
        }
        buf.push('\n');
    }
    buf
}
