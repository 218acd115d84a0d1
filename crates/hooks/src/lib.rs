//! Hook pipeline — priority-ordered middleware over lifecycle events.

pub mod builtin;
pub mod pipeline;

pub use builtin::{register_builtins, sanitize_text, PLAN_REQUIRED};
pub use pipeline::{FnHook, Hook, HookEvent, HookId, HookOutcome, HookPipeline, PipelineRun};
