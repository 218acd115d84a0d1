//! Scripted in-process provider — deterministic canned responses for
//! tests and offline demos. Steps are consumed in order; once the script
//! is exhausted every further call returns a provider error.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use osa_domain::error::{Error, Result};
use osa_domain::message::{ToolCall, Usage};

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

/// One scripted step.
pub enum Step {
    Reply(ChatResponse),
    Fail(Error),
}

impl Step {
    /// A plain-text final answer.
    pub fn text(content: &str) -> Self {
        Step::Reply(ChatResponse {
            content: content.to_owned(),
            tool_calls: Vec::new(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }

    /// An answer that invokes one tool.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Step::Reply(ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: format!("scripted_{name}"),
                name: name.to_owned(),
                arguments,
            }],
            usage: Usage {
                input_tokens: 10,
                output_tokens: 8,
            },
        })
    }

    pub fn overflow() -> Self {
        Step::Fail(Error::ContextOverflow)
    }
}

#[derive(Default)]
struct ScriptState {
    steps: VecDeque<Step>,
    requests: Vec<ChatRequest>,
}

/// The scripted provider. Clones share the same script and request log.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                steps: steps.into(),
                requests: Vec::new(),
            })),
        }
    }

    /// Append steps after construction.
    pub fn push(&self, step: Step) {
        self.state.lock().steps.push_back(step);
    }

    /// Requests observed so far (prompt assertions in tests).
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let step = {
            let mut state = self.state.lock();
            state.requests.push(req);
            state.steps.pop_front()
        };
        match step {
            Some(Step::Reply(resp)) => Ok(resp),
            Some(Step::Fail(e)) => Err(e),
            None => Err(Error::Provider {
                provider: "scripted".into(),
                message: "script exhausted".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osa_domain::message::Message;

    #[tokio::test]
    async fn steps_are_consumed_in_order() {
        let p = ScriptedProvider::new(vec![Step::text("one"), Step::text("two")]);
        let req = ChatRequest {
            messages: vec![Message::user("x")],
            ..Default::default()
        };
        assert_eq!(p.chat(req.clone()).await.unwrap().content, "one");
        assert_eq!(p.chat(req.clone()).await.unwrap().content, "two");
        assert!(p.chat(req).await.is_err());
        assert_eq!(p.request_count(), 3);
    }

    #[tokio::test]
    async fn overflow_step_yields_context_overflow() {
        let p = ScriptedProvider::new(vec![Step::overflow()]);
        let err = p.chat(ChatRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::ContextOverflow));
    }
}
