//! The tool registry — pluggable capabilities the LLM may invoke.
//!
//! Registration is idempotent by name (later registrations replace).
//! `execute` serializes dispatch behind an internal async mutex;
//! `execute_direct` bypasses it for callers already inside a
//! registry-dispatched tool (orchestrator workers), which would
//! otherwise self-deadlock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;

use osa_domain::error::Result;
use osa_domain::message::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler trait & outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool's executable body. Errors returned here are captured into
/// [`ToolOutcome::Error`] at the dispatch seam; they never crash the
/// caller.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, args: Value) -> Result<String>;
}

/// Tagged tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Ok(String),
    Error(String),
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error(_))
    }

    /// The text that goes back into the conversation either way.
    pub fn into_text(self) -> String {
        match self {
            ToolOutcome::Ok(t) => t,
            ToolOutcome::Error(e) => format!("Error: {e}"),
        }
    }
}

/// Adapter for simple synchronous tools.
pub struct FnHandler<F>(pub F);

#[async_trait::async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Result<String> + Send + Sync,
{
    async fn run(&self, args: Value) -> Result<String> {
        (self.0)(args)
    }
}

#[derive(Clone)]
struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    exec_lock: Mutex<()>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            exec_lock: Mutex::new(()),
        }
    }

    /// Register (or replace) a tool.
    pub fn register(&self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        let name = definition.name.clone();
        let replaced = self
            .tools
            .write()
            .insert(name.clone(), RegisteredTool { definition, handler })
            .is_some();
        if replaced {
            tracing::debug!(tool = %name, "tool registration replaced");
        }
    }

    /// Descriptors suitable for inclusion in LLM tool schemas, sorted by
    /// name for stable prompts.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .values()
            .map(|t| t.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Definitions for a named subset, unknown names skipped.
    pub fn filtered_tools(&self, names: &[String]) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        let mut defs: Vec<ToolDefinition> = names
            .iter()
            .filter_map(|n| tools.get(n).map(|t| t.definition.clone()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// JSON-Schema parameters of one tool.
    pub fn parameters_of(&self, name: &str) -> Option<Value> {
        self.tools
            .read()
            .get(name)
            .map(|t| t.definition.parameters.clone())
    }

    /// Serialized execution: one tool at a time process-wide.
    pub async fn execute(&self, name: &str, args: Value) -> ToolOutcome {
        let _guard = self.exec_lock.lock().await;
        self.dispatch(name, args).await
    }

    /// Direct execution, no serialization. For callers that already hold
    /// the registry lock transitively (a tool spawning sub-agents must
    /// not wait on its own dispatch guard).
    pub async fn execute_direct(&self, name: &str, args: Value) -> ToolOutcome {
        self.dispatch(name, args).await
    }

    async fn dispatch(&self, name: &str, args: Value) -> ToolOutcome {
        let handler = {
            let tools = self.tools.read();
            match tools.get(name) {
                Some(t) => t.handler.clone(),
                None => return ToolOutcome::Error(format!("unknown tool: {name}")),
            }
        };

        match handler.run(args).await {
            Ok(text) => ToolOutcome::Ok(text),
            Err(e) => ToolOutcome::Error(e.to_string()),
        }
    }

    /// Best-effort relevance search over names and descriptions.
    pub fn search(&self, query: &str) -> Vec<(String, String, f64)> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<(String, String, f64)> = self
            .tools
            .read()
            .values()
            .filter_map(|t| {
                let haystack =
                    format!("{} {}", t.definition.name, t.definition.description).to_lowercase();
                let hits = terms.iter().filter(|term| haystack.contains(*term)).count();
                if hits == 0 {
                    return None;
                }
                let relevance = hits as f64 / terms.len() as f64;
                Some((
                    t.definition.name.clone(),
                    t.definition.description.clone(),
                    relevance,
                ))
            })
            .collect();

        results.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        results
    }
}
