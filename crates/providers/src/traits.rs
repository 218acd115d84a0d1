use osa_domain::error::Result;
use osa_domain::message::{Message, ToolCall, ToolDefinition, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. When `None`, the provider uses its default.
    pub model: Option<String>,
    /// Per-call timeout in milliseconds. `None` uses the configured default.
    pub timeout_ms: Option<u64>,
}

/// A provider-agnostic chat completion response.
///
/// `content` and `tool_calls` may each be empty; a response with neither
/// is legal (and treated as a final empty answer by the loop).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter implements. Adapters translate between the
/// internal types and each vendor's wire format; callers only ever see
/// this surface.
///
/// Context-window violations must surface as
/// [`osa_domain::Error::ContextOverflow`] so the agent loop can compact
/// and retry; other transport failures surface as `Provider`/`Http`/
/// `Timeout` and retrying is the caller's decision.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// A unique identifier for this provider instance.
    fn name(&self) -> &str;

    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;
}
