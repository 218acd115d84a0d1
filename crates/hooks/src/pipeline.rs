//! Priority-ordered middleware over lifecycle events.
//!
//! `pre_*` events run synchronously in ascending priority order and
//! thread the payload from hook to hook; a `Block` halts the pipeline
//! and aborts the triggering action. `post_*` and `session_end` are
//! fire-and-forget.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Lifecycle events the pipeline dispatches on.
///
/// `PreMessage` is the inbound-text seam (sanitizer, plan gate); the
/// remaining four are the tool/response lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    PreMessage,
    PreToolUse,
    PostToolUse,
    PreResponse,
    SessionEnd,
}

/// What a hook did with the payload.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    /// Continue with (possibly rewritten) payload.
    Proceed(Value),
    /// Halt the pipeline; the triggering action is aborted.
    Block { reason: String },
    /// This hook has nothing to say; payload passes through unchanged.
    Skip,
}

pub trait Hook: Send + Sync {
    fn handle(&self, payload: &Value) -> HookOutcome;
}

/// Adapter for closure hooks.
pub struct FnHook<F>(pub F);

impl<F> Hook for FnHook<F>
where
    F: Fn(&Value) -> HookOutcome + Send + Sync,
{
    fn handle(&self, payload: &Value) -> HookOutcome {
        (self.0)(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

struct Registration {
    id: u64,
    name: String,
    event: HookEvent,
    priority: i32,
    hook: Arc<dyn Hook>,
}

/// Result of a synchronous pipeline run. `payload` is the value after
/// every hook that ran, even when a later hook blocked.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub payload: Value,
    pub blocked: Option<String>,
}

impl PipelineRun {
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }
}

pub struct HookPipeline {
    hooks: RwLock<Vec<Registration>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl HookPipeline {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Register a hook. Hooks for one event run in ascending priority.
    pub fn register(
        &self,
        name: &str,
        event: HookEvent,
        priority: i32,
        hook: Arc<dyn Hook>,
    ) -> HookId {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut hooks = self.hooks.write();
        hooks.push(Registration {
            id,
            name: name.to_owned(),
            event,
            priority,
            hook,
        });
        hooks.sort_by_key(|r| r.priority);
        HookId(id)
    }

    pub fn unregister(&self, id: HookId) {
        self.hooks.write().retain(|r| r.id != id.0);
    }

    /// Synchronous run for `pre_*` events. Invocation reads a snapshot,
    /// so hooks may register/unregister without deadlocking.
    pub fn run_pre(&self, event: HookEvent, payload: Value) -> PipelineRun {
        let snapshot: Vec<(String, Arc<dyn Hook>)> = {
            let hooks = self.hooks.read();
            hooks
                .iter()
                .filter(|r| r.event == event)
                .map(|r| (r.name.clone(), r.hook.clone()))
                .collect()
        };

        let mut current = payload;
        for (name, hook) in snapshot {
            match hook.handle(&current) {
                HookOutcome::Proceed(next) => current = next,
                HookOutcome::Skip => {}
                HookOutcome::Block { reason } => {
                    tracing::info!(hook = %name, event = ?event, reason = %reason, "hook blocked action");
                    return PipelineRun {
                        payload: current,
                        blocked: Some(reason),
                    };
                }
            }
        }
        PipelineRun {
            payload: current,
            blocked: None,
        }
    }

    /// Fire-and-forget run for `post_*` / `session_end`. Outcomes are
    /// ignored; panics are caught and logged.
    pub fn run_post(&self, event: HookEvent, payload: Value) {
        let snapshot: Vec<(String, Arc<dyn Hook>)> = {
            let hooks = self.hooks.read();
            hooks
                .iter()
                .filter(|r| r.event == event)
                .map(|r| (r.name.clone(), r.hook.clone()))
                .collect()
        };
        if snapshot.is_empty() {
            return;
        }

        tokio::spawn(async move {
            for (name, hook) in snapshot {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    hook.handle(&payload)
                }));
                if result.is_err() {
                    tracing::error!(hook = %name, event = ?event, "post hook panicked");
                }
            }
        });
    }

    pub fn count(&self, event: HookEvent) -> usize {
        self.hooks.read().iter().filter(|r| r.event == event).count()
    }
}
