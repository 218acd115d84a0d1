//! Anthropic Messages API adapter.
//!
//! The system prompt travels as a top-level `system` field; tool calls
//! and tool results are content blocks rather than message roles.

use serde_json::Value;

use osa_domain::config::ProviderConfig;
use osa_domain::error::{Error, Result};
use osa_domain::message::{Message, Role, ToolCall, Usage};

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::{is_context_overflow_text, resolve_api_key};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    default_timeout_ms: u64,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(cfg: &ProviderConfig, default_timeout_ms: u64) -> Result<Self> {
        let api_key = resolve_api_key(cfg)
            .ok_or_else(|| Error::Config(format!("provider {}: api key required", cfg.id)))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_owned(),
            api_key,
            default_model: cfg
                .default_model
                .clone()
                .unwrap_or_else(|| "claude-3-5-haiku-latest".into()),
            default_timeout_ms,
            client,
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = build_body(&req, &self.default_model);
        let timeout =
            std::time::Duration::from_millis(req.timeout_ms.unwrap_or(self.default_timeout_ms));

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("provider {}", self.id))
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            if status.as_u16() == 400 && is_context_overflow_text(&text) {
                return Err(Error::ContextOverflow);
            }
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {status}: {}", crate::util::truncate(&text, 300)),
            });
        }

        let json: Value = serde_json::from_str(&text)?;
        parse_response(&self.id, &json)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_body(req: &ChatRequest, default_model: &str) -> Value {
    // Anthropic takes the system prompt out-of-band.
    let system: Vec<&str> = req
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.text())
        .collect();

    let messages: Vec<Value> = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(msg_to_anthropic)
        .collect();

    let mut body = serde_json::json!({
        "model": req.model.as_deref().unwrap_or(default_model),
        "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if !system.is_empty() {
        body["system"] = Value::String(system.join("\n\n"));
    }
    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    if !req.tools.is_empty() {
        body["tools"] = Value::Array(
            req.tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect(),
        );
    }
    body
}

fn msg_to_anthropic(msg: &Message) -> Value {
    match msg.role {
        // Tool results are user-role content blocks on this wire.
        Role::Tool => serde_json::json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": msg.tool_call_id.as_deref().unwrap_or(""),
                "content": msg.text(),
            }]
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let mut blocks: Vec<Value> = Vec::new();
            if let Some(ref text) = msg.content {
                if !text.is_empty() {
                    blocks.push(serde_json::json!({"type": "text", "text": text}));
                }
            }
            for tc in &msg.tool_calls {
                blocks.push(serde_json::json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.name,
                    "input": tc.arguments,
                }));
            }
            serde_json::json!({"role": "assistant", "content": blocks})
        }
        Role::Assistant => serde_json::json!({"role": "assistant", "content": msg.text()}),
        _ => serde_json::json!({"role": "user", "content": msg.text()}),
    }
}

fn parse_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let blocks = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Error::Provider {
            provider: provider.to_owned(),
            message: "no content blocks in response".into(),
        })?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    content.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                let arguments = block
                    .get("input")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                tool_calls.push(ToolCall { id, name, arguments });
            }
            _ => {}
        }
    }

    let usage = body
        .get("usage")
        .map(|u| Usage {
            input_tokens: u
                .get("input_tokens")
                .and_then(|n| n.as_u64())
                .unwrap_or(0) as u32,
            output_tokens: u
                .get("output_tokens")
                .and_then(|n| n.as_u64())
                .unwrap_or(0) as u32,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_lifted_out_of_band() {
        let req = ChatRequest {
            messages: vec![Message::system("be brief"), Message::user("hi")],
            ..Default::default()
        };
        let body = build_body(&req, "m");
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn tool_result_becomes_user_content_block() {
        let wire = msg_to_anthropic(&Message::tool_result("c1", "42"));
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["tool_use_id"], "c1");
    }

    #[test]
    fn parses_mixed_content_blocks() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "let me check"},
                {"type": "tool_use", "id": "tu1", "name": "echo", "input": {"text": "x"}}
            ],
            "usage": {"input_tokens": 9, "output_tokens": 3}
        });
        let resp = parse_response("p", &body).unwrap();
        assert_eq!(resp.content, "let me check");
        assert_eq!(resp.tool_calls[0].name, "echo");
        assert_eq!(resp.usage.total(), 12);
    }
}
