//! Built-in hooks: input sanitizer, tool-call integrity check, plan gate.

use std::sync::Arc;

use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use osa_domain::config::HooksConfig;
use osa_domain::signal::Mode;
use osa_tools::ToolRegistry;

use crate::pipeline::{FnHook, Hook, HookEvent, HookOutcome, HookPipeline};

/// The reason the plan gate blocks with; the loop treats it as "enter
/// plan mode", not as a rejection.
pub const PLAN_REQUIRED: &str = "plan_required";

/// Register the required built-ins on a pipeline.
pub fn register_builtins(
    pipeline: &HookPipeline,
    tools: Arc<ToolRegistry>,
    config: &HooksConfig,
) {
    pipeline.register(
        "sanitize_input",
        HookEvent::PreMessage,
        0,
        Arc::new(FnHook(sanitize_hook)),
    );
    pipeline.register(
        "plan_gate",
        HookEvent::PreMessage,
        20,
        plan_gate(config.plan_weight_threshold),
    );
    pipeline.register(
        "tool_integrity",
        HookEvent::PreToolUse,
        10,
        tool_integrity(tools),
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input sanitizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Unicode NFC normalization + control-character strip (newlines and
/// tabs survive).
pub fn sanitize_text(text: &str) -> String {
    text.nfc()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect()
}

fn sanitize_hook(payload: &Value) -> HookOutcome {
    let text = match payload.get("text").and_then(|v| v.as_str()) {
        Some(t) => t,
        None => return HookOutcome::Skip,
    };
    let sanitized = sanitize_text(text);
    if sanitized == text {
        return HookOutcome::Skip;
    }
    let mut next = payload.clone();
    next["text"] = Value::String(sanitized);
    HookOutcome::Proceed(next)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call integrity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Name must resolve in the registry; arguments must be an object and
/// carry every property the tool's schema marks required.
fn tool_integrity(tools: Arc<ToolRegistry>) -> Arc<dyn Hook> {
    Arc::new(FnHook(move |payload: &Value| {
        let name = match payload.get("name").and_then(|v| v.as_str()) {
            Some(n) => n,
            None => {
                return HookOutcome::Block {
                    reason: "tool call has no name".into(),
                }
            }
        };

        let schema = match tools.parameters_of(name) {
            Some(s) => s,
            None => {
                return HookOutcome::Block {
                    reason: format!("unknown tool: {name}"),
                }
            }
        };

        let args = payload.get("arguments").unwrap_or(&Value::Null);
        if !args.is_object() {
            return HookOutcome::Block {
                reason: format!("tool {name}: arguments must be an object"),
            };
        }

        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for key in required.iter().filter_map(|k| k.as_str()) {
                if args.get(key).is_none() {
                    return HookOutcome::Block {
                        reason: format!("tool {name}: missing required argument '{key}'"),
                    };
                }
            }
        }

        HookOutcome::Skip
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Heavy build/execute/maintain signals are routed through plan mode:
/// one provider call whose sole product is a plan for review.
fn plan_gate(weight_threshold: f64) -> Arc<dyn Hook> {
    Arc::new(FnHook(move |payload: &Value| {
        if payload
            .get("skip_plan")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return HookOutcome::Skip;
        }

        let weight = payload
            .pointer("/signal/weight")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let mode = payload
            .pointer("/signal/mode")
            .and_then(|v| v.as_str())
            .and_then(Mode::parse);

        let gated_mode = matches!(mode, Some(Mode::Build | Mode::Execute | Mode::Maintain));
        if gated_mode && weight >= weight_threshold {
            return HookOutcome::Block {
                reason: PLAN_REQUIRED.into(),
            };
        }
        HookOutcome::Skip
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use osa_domain::message::ToolDefinition;
    use osa_tools::FnHandler;

    #[test]
    fn sanitize_strips_controls_and_normalizes() {
        let dirty = "he\u{0007}llo\u{200B}e\u{0301}";
        let clean = sanitize_text(dirty);
        assert!(!clean.contains('\u{0007}'));
        // NFC composes e + combining acute into é.
        assert!(clean.ends_with('é'));
        // Newlines and tabs survive.
        assert_eq!(sanitize_text("a\n\tb"), "a\n\tb");
    }

    fn pipeline_with_builtins() -> (Arc<ToolRegistry>, HookPipeline) {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(
            ToolDefinition {
                name: "echo".into(),
                description: "d".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            },
            Arc::new(FnHandler(|_| Ok(String::new()))),
        );
        let pipeline = HookPipeline::new();
        register_builtins(&pipeline, tools.clone(), &HooksConfig::default());
        (tools, pipeline)
    }

    #[test]
    fn integrity_passes_valid_call() {
        let (_tools, pipeline) = pipeline_with_builtins();
        let run = pipeline.run_pre(
            HookEvent::PreToolUse,
            serde_json::json!({"name": "echo", "arguments": {"text": "hi"}}),
        );
        assert!(!run.is_blocked());
    }

    #[test]
    fn integrity_blocks_unknown_tool() {
        let (_tools, pipeline) = pipeline_with_builtins();
        let run = pipeline.run_pre(
            HookEvent::PreToolUse,
            serde_json::json!({"name": "ghost", "arguments": {}}),
        );
        assert!(run.blocked.unwrap().contains("unknown tool"));
    }

    #[test]
    fn integrity_blocks_missing_required_argument() {
        let (_tools, pipeline) = pipeline_with_builtins();
        let run = pipeline.run_pre(
            HookEvent::PreToolUse,
            serde_json::json!({"name": "echo", "arguments": {}}),
        );
        assert!(run.blocked.unwrap().contains("missing required argument"));
    }

    #[test]
    fn plan_gate_fires_for_heavy_build_signals() {
        let (_tools, pipeline) = pipeline_with_builtins();
        let run = pipeline.run_pre(
            HookEvent::PreMessage,
            serde_json::json!({
                "text": "build the thing",
                "signal": {"mode": "build", "weight": 0.9}
            }),
        );
        assert_eq!(run.blocked.as_deref(), Some(PLAN_REQUIRED));
    }

    #[test]
    fn plan_gate_respects_skip_flag_and_mode() {
        let (_tools, pipeline) = pipeline_with_builtins();

        let skipped = pipeline.run_pre(
            HookEvent::PreMessage,
            serde_json::json!({
                "text": "build the thing",
                "skip_plan": true,
                "signal": {"mode": "build", "weight": 0.9}
            }),
        );
        assert!(!skipped.is_blocked());

        let assist = pipeline.run_pre(
            HookEvent::PreMessage,
            serde_json::json!({
                "text": "explain this",
                "signal": {"mode": "assist", "weight": 0.95}
            }),
        );
        assert!(!assist.is_blocked());

        let light = pipeline.run_pre(
            HookEvent::PreMessage,
            serde_json::json!({
                "text": "build it",
                "signal": {"mode": "build", "weight": 0.5}
            }),
        );
        assert!(!light.is_blocked());
    }

    #[test]
    fn sanitizer_rewrites_payload_text() {
        let (_tools, pipeline) = pipeline_with_builtins();
        let run = pipeline.run_pre(
            HookEvent::PreMessage,
            serde_json::json!({
                "text": "hi\u{0000}there",
                "signal": {"mode": "assist", "weight": 0.3}
            }),
        );
        assert_eq!(run.payload["text"], "hithere");
    }
}
