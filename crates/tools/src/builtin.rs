//! Built-in tools registered at bootstrap.

use std::sync::Arc;

use serde_json::Value;

use osa_domain::error::{Error, Result};
use osa_domain::message::ToolDefinition;
use osa_memory::LongTermMemory;

use crate::registry::{FnHandler, ToolRegistry};

/// read_file refuses files larger than this.
const MAX_FILE_BYTES: u64 = 256 * 1024;

pub fn register_builtins(registry: &ToolRegistry, memory: Arc<LongTermMemory>) {
    register_echo(registry);
    register_current_time(registry);
    register_read_file(registry);
    register_remember(registry, memory);
}

fn register_echo(registry: &ToolRegistry) {
    registry.register(
        ToolDefinition {
            name: "echo".into(),
            description: "Repeats the given text back verbatim.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Text to repeat"}
                },
                "required": ["text"]
            }),
        },
        Arc::new(FnHandler(|args: Value| {
            required_str(&args, "text").map(str::to_owned)
        })),
    );
}

fn register_current_time(registry: &ToolRegistry) {
    registry.register(
        ToolDefinition {
            name: "current_time".into(),
            description: "Returns the current UTC time as an ISO-8601 string.".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        },
        Arc::new(FnHandler(|_args: Value| {
            Ok(chrono::Utc::now().to_rfc3339())
        })),
    );
}

fn register_read_file(registry: &ToolRegistry) {
    registry.register(
        ToolDefinition {
            name: "read_file".into(),
            description: "Reads a UTF-8 text file from the host filesystem.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Absolute or cwd-relative path"}
                },
                "required": ["path"]
            }),
        },
        Arc::new(FnHandler(|args: Value| {
            let path = required_str(&args, "path")?;
            let meta = std::fs::metadata(path)?;
            if meta.len() > MAX_FILE_BYTES {
                return Err(Error::InvalidRequest(format!(
                    "file too large ({} bytes, limit {MAX_FILE_BYTES})",
                    meta.len()
                )));
            }
            Ok(std::fs::read_to_string(path)?)
        })),
    );
}

fn register_remember(registry: &ToolRegistry, memory: Arc<LongTermMemory>) {
    registry.register(
        ToolDefinition {
            name: "remember".into(),
            description: "Stores a note in long-term memory under a category.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "The note to store"},
                    "category": {"type": "string", "description": "Category heading, e.g. user, project"}
                },
                "required": ["text"]
            }),
        },
        Arc::new(FnHandler(move |args: Value| {
            let text = required_str(&args, "text")?;
            let category = args
                .get("category")
                .and_then(|v| v.as_str())
                .unwrap_or("general");
            memory.remember(text, category)?;
            Ok(format!("remembered under '{category}'"))
        })),
    );
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidRequest(format!("missing required argument: {key}")))
}
