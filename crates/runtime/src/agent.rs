//! The per-session ReAct agent loop.
//!
//! `process_message` runs one bounded reason/act loop: classify → noise
//! report → persist → compact → plan gate → iterate (context → provider
//! → tools → hooks). Cancellation is cooperative — checked before each
//! provider call and each tool dispatch; a mid-flight provider result is
//! discarded when the flag is already set.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use osa_context::{ContextSources, RuntimeInfo};
use osa_domain::error::{Error, Result};
use osa_domain::message::{Message, Role, ToolCall};
use osa_domain::signal::{ChannelKind, Signal};
use osa_hooks::{HookEvent, PLAN_REQUIRED};
use osa_memory::EpisodicIndex;
use osa_providers::ChatRequest;

use crate::sessions::SessionStatus;
use crate::AgentRuntime;

/// Number of forced compaction + retry rounds on provider overflow.
const MAX_OVERFLOW_RETRIES: u32 = 3;

const ITERATION_CAP_MESSAGE: &str = "I've reached my reasoning limit for this request.";

const PLAN_INSTRUCTION: &str = "Produce a concise, numbered plan for the request above. \
     Do not execute anything and do not call tools; the plan will be \
     reviewed before work begins.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options & outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ProcessOpts {
    pub channel: ChannelKind,
    pub user_id: Option<String>,
    /// Set on the re-invocation after a plan was approved.
    pub skip_plan: bool,
    /// The approved plan, injected as workflow state.
    pub approved_plan: Option<String>,
    pub model: Option<String>,
    /// Sub-agent role system prompt; replaces the default identity.
    pub role_prompt: Option<String>,
    /// Restrict the tool schema to these names.
    pub tool_filter: Option<Vec<String>>,
    /// Prior context (dependency results) injected as workflow state.
    pub extra_context: Option<String>,
    /// Orchestrator workers dispatch tools without the registry's
    /// serialization lock to avoid self-deadlock.
    pub direct_tool_dispatch: bool,
    /// Override the configured iteration cap (sub-agents run shorter).
    pub max_iterations: Option<u32>,
}

impl Default for ProcessOpts {
    fn default() -> Self {
        Self {
            channel: ChannelKind::Cli,
            user_id: None,
            skip_plan: false,
            approved_plan: None,
            model: None,
            role_prompt: None,
            tool_filter: None,
            extra_context: None,
            direct_tool_dispatch: false,
            max_iterations: None,
        }
    }
}

/// Tagged loop output.
#[derive(Debug, Clone)]
pub enum LoopOutcome {
    Answer(String),
    /// Plan mode: the caller presents the plan and re-invokes with
    /// `skip_plan = true` once approved.
    Plan { text: String, signal: Signal },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process one user message for a session. Concurrent calls for the same
/// session queue FIFO behind the session lock; different sessions run in
/// parallel.
pub async fn process_message(
    rt: &Arc<AgentRuntime>,
    session_id: &str,
    text: &str,
    opts: ProcessOpts,
) -> Result<LoopOutcome> {
    let _permit = rt.locks.acquire(session_id).await;
    let cancel = rt.cancel_map.register(session_id);

    let result = process_inner(rt, session_id, text, &opts, &cancel).await;

    rt.cancel_map.remove(session_id);
    if let Some(state) = rt.sessions.get(session_id) {
        let mut s = state.lock();
        s.status = SessionStatus::Idle;
        s.touch();
    }

    if let Err(ref e) = result {
        tracing::warn!(session_id, error = %e, "process_message failed");
    }
    result
}

async fn process_inner(
    rt: &Arc<AgentRuntime>,
    session_id: &str,
    raw_text: &str,
    opts: &ProcessOpts,
    cancel: &crate::sessions::CancelToken,
) -> Result<LoopOutcome> {
    // ── Session & ingress sanitation ────────────────────────────────
    let (state, is_new) = rt
        .sessions
        .ensure_session(session_id, opts.channel, opts.user_id.clone());
    if is_new {
        let history = rt.transcripts.recall(session_id)?;
        let mut s = state.lock();
        s.messages = history;
        s.tools = rt.tools.list_tools();
    }

    let ingress = rt.hooks.run_pre(
        HookEvent::PreMessage,
        serde_json::json!({ "text": raw_text, "skip_plan": opts.skip_plan }),
    );
    if let Some(reason) = ingress.blocked {
        // The plan gate never fires here (no signal yet); any block is a
        // real rejection.
        return Err(Error::Blocked(reason));
    }
    let text = ingress
        .payload
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or(raw_text)
        .to_owned();

    // ── 1. Classify ─────────────────────────────────────────────────
    let signal = rt.classifier.classify(&text, opts.channel).await;
    state.lock().current_signal = Some(signal.clone());

    // ── 2. Noise report (instrumentation, never a gate) ────────────
    let verdict = rt.noise.evaluate(&text, signal.weight);
    if verdict.is_noise() {
        tracing::debug!(session_id, ?verdict, "message classified as noise; processing anyway");
        rt.bus.emit_system(
            "signal_low_weight",
            serde_json::json!({
                "session_id": session_id,
                "weight": signal.weight,
                "verdict": verdict,
            }),
        );
    }

    // ── 3. Persist the user message ────────────────────────────────
    // On a plan-approval re-invoke the same text arrives again; don't
    // duplicate it in the log.
    let already_tail = opts.skip_plan
        && state
            .lock()
            .messages
            .last()
            .map(|m| m.role == Role::User && m.text() == text)
            .unwrap_or(false);
    if !already_tail {
        let user_msg = Message::user(&text);
        rt.transcripts.append(session_id, &user_msg)?;
        state.lock().messages.push(user_msg);
    }

    // ── 4. Compact under pressure ──────────────────────────────────
    let conversation = { state.lock().messages.clone() };
    let compacted = rt
        .compactor
        .maybe_compact(session_id, conversation, &rt.bus)
        .await;
    {
        let mut s = state.lock();
        if compacted.len() != s.messages.len() {
            rt.transcripts.replace(session_id, &compacted)?;
            s.messages = compacted;
        }
    }

    // ── 5. Plan gate ───────────────────────────────────────────────
    if !opts.skip_plan {
        let gate = rt.hooks.run_pre(
            HookEvent::PreMessage,
            serde_json::json!({
                "text": text,
                "skip_plan": false,
                "signal": signal,
            }),
        );
        match gate.blocked.as_deref() {
            Some(PLAN_REQUIRED) => {
                let plan = generate_plan(rt, session_id, &signal, opts).await?;
                rt.bus.emit_system(
                    "plan_proposed",
                    serde_json::json!({ "session_id": session_id }),
                );
                return Ok(LoopOutcome::Plan { text: plan, signal });
            }
            Some(reason) => return Err(Error::Blocked(reason.to_owned())),
            None => {}
        }
    }

    // ── 6. Iterate ─────────────────────────────────────────────────
    run_react_loop(rt, session_id, &state, &text, &signal, opts, cancel).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The bounded reason/act loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_react_loop(
    rt: &Arc<AgentRuntime>,
    session_id: &str,
    state: &Arc<parking_lot::Mutex<crate::sessions::SessionState>>,
    text: &str,
    signal: &Signal,
    opts: &ProcessOpts,
    cancel: &crate::sessions::CancelToken,
) -> Result<LoopOutcome> {
    let max_iterations = opts
        .max_iterations
        .unwrap_or(rt.config.agent.max_iterations)
        .max(1);
    let tool_defs = match &opts.tool_filter {
        Some(names) => rt.tools.filtered_tools(names),
        None => rt.tools.list_tools(),
    };

    let mut overflow_retries = 0u32;
    let mut iteration = 0u32;

    loop {
        if iteration >= max_iterations {
            break;
        }
        iteration += 1;
        {
            let mut s = state.lock();
            s.iteration = iteration;
            s.status = SessionStatus::Thinking;
        }

        // Checkpoint: before the provider call.
        if cancel.is_cancelled() {
            tracing::info!(session_id, iteration, "loop cancelled before provider call");
            return Err(Error::Cancelled);
        }

        let conversation = { state.lock().messages.clone() };
        let sources = build_sources(rt, session_id, text, opts);
        let messages = rt.assembler.build(&sources, signal, &conversation);

        rt.bus.emit(
            osa_bus::topics::LLM_REQUEST,
            serde_json::json!({ "session_id": session_id, "iteration": iteration }),
        );
        let started = Instant::now();

        let req = ChatRequest {
            messages,
            tools: tool_defs.clone(),
            temperature: Some(rt.config.agent.temperature),
            max_tokens: None,
            model: opts.model.clone(),
            timeout_ms: Some(rt.config.llm.provider_timeout_ms),
        };

        let resp = match rt.providers.chat(req).await {
            Ok(resp) => resp,
            Err(Error::ContextOverflow) => {
                overflow_retries += 1;
                if overflow_retries > MAX_OVERFLOW_RETRIES {
                    return Err(Error::ContextOverflow);
                }
                tracing::warn!(
                    session_id,
                    attempt = overflow_retries,
                    "context overflow; forcing compaction and retrying"
                );
                let conversation = { state.lock().messages.clone() };
                let compacted = rt
                    .compactor
                    .force_compact(session_id, conversation, &rt.bus)
                    .await;
                rt.transcripts.replace(session_id, &compacted)?;
                state.lock().messages = compacted;
                continue;
            }
            Err(e) => return Err(e),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        {
            let mut s = state.lock();
            s.total_input_tokens += resp.usage.input_tokens as u64;
            s.total_output_tokens += resp.usage.output_tokens as u64;
        }
        // llm_response is deferred until after any tool round so the
        // per-iteration event order on the bus is fixed:
        // llm_request → tool_call(start/end)* → llm_response.
        let llm_response_payload = serde_json::json!({
            "session_id": session_id,
            "duration_ms": duration_ms,
            "usage": resp.usage,
        });

        // A result that lands after cancellation is discarded.
        if cancel.is_cancelled() {
            tracing::info!(session_id, iteration, "provider result discarded after cancellation");
            return Err(Error::Cancelled);
        }

        // ── Final answer ───────────────────────────────────────────
        if resp.tool_calls.is_empty() {
            rt.bus.emit(osa_bus::topics::LLM_RESPONSE, llm_response_payload);
            let pre = rt.hooks.run_pre(
                HookEvent::PreResponse,
                serde_json::json!({ "session_id": session_id, "response": resp.content }),
            );
            if let Some(reason) = pre.blocked {
                return Err(Error::Blocked(reason));
            }
            let response = pre
                .payload
                .get("response")
                .and_then(|v| v.as_str())
                .unwrap_or(&resp.content)
                .to_owned();

            let assistant = Message::assistant(&response);
            rt.transcripts.append(session_id, &assistant)?;
            state.lock().messages.push(assistant);

            rt.bus.emit(
                osa_bus::topics::AGENT_RESPONSE,
                serde_json::json!({
                    "session_id": session_id,
                    "response": response,
                    "signal": signal,
                }),
            );
            return Ok(LoopOutcome::Answer(response));
        }

        // ── Tool round ─────────────────────────────────────────────
        // The round (assistant tool_calls + tool results) is buffered
        // and committed atomically: a cancellation mid-round discards
        // partial output instead of persisting a dangling pair.
        let assistant = Message::assistant_tool_calls(
            if resp.content.is_empty() {
                None
            } else {
                Some(resp.content.clone())
            },
            resp.tool_calls.clone(),
        );
        let mut round: Vec<Message> = vec![assistant];

        for tc in &resp.tool_calls {
            if cancel.is_cancelled() {
                tracing::info!(session_id, tool = %tc.name, "cancelled before tool dispatch; round discarded");
                return Err(Error::Cancelled);
            }
            let result_text = dispatch_tool(rt, session_id, tc, opts).await;
            round.push(Message::tool_result(&tc.id, result_text));
        }

        // A cancellation that landed while tools were running discards
        // the whole round — nothing from it is persisted.
        if cancel.is_cancelled() {
            tracing::info!(session_id, "cancelled during tool round; output discarded");
            return Err(Error::Cancelled);
        }

        rt.bus.emit(osa_bus::topics::LLM_RESPONSE, llm_response_payload);

        {
            let mut s = state.lock();
            for msg in &round {
                rt.transcripts.append(session_id, msg)?;
                s.messages.push(msg.clone());
            }
        }
    }

    // ── Iteration cap ──────────────────────────────────────────────
    tracing::warn!(session_id, max_iterations, "iteration cap reached");
    let last_content = {
        let s = state.lock();
        s.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.text().is_empty())
            .map(|m| m.text().to_owned())
    };
    let response = last_content.unwrap_or_else(|| ITERATION_CAP_MESSAGE.to_owned());
    let assistant = Message::assistant(&response);
    rt.transcripts.append(session_id, &assistant)?;
    state.lock().messages.push(assistant);
    rt.bus.emit(
        osa_bus::topics::AGENT_RESPONSE,
        serde_json::json!({
            "session_id": session_id,
            "response": response,
            "signal": signal,
        }),
    );
    Ok(LoopOutcome::Answer(response))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch_tool(
    rt: &Arc<AgentRuntime>,
    session_id: &str,
    tc: &ToolCall,
    opts: &ProcessOpts,
) -> String {
    if let Some(session) = rt.sessions.get(session_id) {
        session.lock().status = SessionStatus::ToolUse;
    }

    rt.bus.emit(
        osa_bus::topics::TOOL_CALL,
        serde_json::json!({
            "session_id": session_id,
            "name": tc.name,
            "phase": "start",
            "args": args_hint(&tc.arguments),
        }),
    );
    let started = Instant::now();

    let pre = rt.hooks.run_pre(
        HookEvent::PreToolUse,
        serde_json::json!({
            "session_id": session_id,
            "name": tc.name,
            "arguments": tc.arguments,
        }),
    );

    let (result_text, success) = if let Some(reason) = pre.blocked {
        (format!("Error: {reason}"), false)
    } else {
        let outcome = if opts.direct_tool_dispatch {
            rt.tools.execute_direct(&tc.name, tc.arguments.clone()).await
        } else {
            rt.tools.execute(&tc.name, tc.arguments.clone()).await
        };
        let success = !outcome.is_error();
        (outcome.into_text(), success)
    };

    rt.bus.emit(
        osa_bus::topics::TOOL_CALL,
        serde_json::json!({
            "session_id": session_id,
            "name": tc.name,
            "phase": "end",
            "duration_ms": started.elapsed().as_millis() as u64,
            "success": success,
        }),
    );
    rt.hooks.run_post(
        HookEvent::PostToolUse,
        serde_json::json!({
            "session_id": session_id,
            "name": tc.name,
            "success": success,
            "result": result_text,
        }),
    );

    if let Some(session) = rt.sessions.get(session_id) {
        session.lock().status = SessionStatus::Thinking;
    }
    result_text
}

fn args_hint(args: &Value) -> String {
    let rendered = args.to_string();
    if rendered.len() <= 120 {
        rendered
    } else {
        let mut end = 120;
        while end > 0 && !rendered.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &rendered[..end])
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context sources & plan generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn build_sources(
    rt: &Arc<AgentRuntime>,
    session_id: &str,
    text: &str,
    opts: &ProcessOpts,
) -> ContextSources {
    let identity = opts
        .role_prompt
        .clone()
        .unwrap_or_else(|| rt.identity.clone());

    let index = EpisodicIndex::build(rt.longterm.sections());
    let memory_snippets = index.relevant(text, 3);

    let mut workflow_parts = Vec::new();
    if let Some(ref plan) = opts.approved_plan {
        workflow_parts.push(format!("Approved plan:\n{plan}"));
    }
    if let Some(ref extra) = opts.extra_context {
        workflow_parts.push(extra.clone());
    }
    let workflow_state = if workflow_parts.is_empty() {
        None
    } else {
        Some(workflow_parts.join("\n\n"))
    };

    ContextSources {
        identity,
        runtime: RuntimeInfo {
            session_id: session_id.to_owned(),
            channel: opts.channel.tag().to_owned(),
            cwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            os: std::env::consts::OS.to_owned(),
            provider: rt
                .providers
                .default_provider_id()
                .unwrap_or("none")
                .to_owned(),
            model: opts.model.clone().unwrap_or_else(|| "default".to_owned()),
            git_summary: rt.git_summary.clone(),
        },
        skills_catalog: rt.skills_catalog.read().clone(),
        memory_snippets,
        workflow_state,
        user_profile: rt.longterm.recall_category("user"),
        style_profile: rt.longterm.recall_category("style"),
        bulletin: rt.longterm.recall_category("bulletin"),
        os_templates: None,
        machine_addendum: None,
    }
}

/// Plan mode: one provider call whose sole product is a plan. Nothing is
/// appended to the conversation — a rejected plan leaves the session
/// exactly as it was.
async fn generate_plan(
    rt: &Arc<AgentRuntime>,
    session_id: &str,
    signal: &Signal,
    opts: &ProcessOpts,
) -> Result<String> {
    let state = rt
        .sessions
        .get(session_id)
        .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
    let conversation = { state.lock().messages.clone() };
    let sources = build_sources(rt, session_id, &signal.raw_text, opts);

    let mut messages = rt.assembler.build(&sources, signal, &conversation);
    messages.push(Message::system(PLAN_INSTRUCTION));

    let req = ChatRequest {
        messages,
        temperature: Some(0.2),
        model: opts.model.clone(),
        timeout_ms: Some(rt.config.llm.provider_timeout_ms),
        ..Default::default()
    };
    let resp = rt.providers.chat(req).await?;
    Ok(resp.content)
}
