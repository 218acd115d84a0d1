//! End-to-end loop scenarios driven by the scripted provider.

use std::sync::Arc;

use osa_domain::config::Config;
use osa_domain::error::Error;
use osa_domain::message::{Message, Role};
use osa_domain::signal::{ChannelKind, Genre, Mode, MsgType};
use osa_providers::{ProviderRegistry, ScriptedProvider, Step};
use osa_runtime::{process_message, AgentRuntime, LoopOutcome, ProcessOpts};

fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.state_dir = Some(dir.to_path_buf());
    // Tests feed the script to the loop only; classification and noise
    // run on the deterministic path.
    config.classifier.llm_enabled = false;
    config.orchestrator.appraisal_enabled = false;
    config
}

fn runtime_with(
    dir: &std::path::Path,
    steps: Vec<Step>,
) -> (Arc<AgentRuntime>, ScriptedProvider) {
    let scripted = ScriptedProvider::new(steps);
    let providers = ProviderRegistry::single("scripted", Arc::new(scripted.clone()));
    let rt = AgentRuntime::bootstrap(test_config(dir), providers).unwrap();
    (rt, scripted)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1 — noise passthrough
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn noise_is_logged_but_still_processed() {
    let dir = tempfile::tempdir().unwrap();
    let (rt, _) = runtime_with(dir.path(), vec![Step::text("hello!")]);

    let low_weight_seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = low_weight_seen.clone();
    rt.bus.subscribe(
        osa_bus::topics::SYSTEM_EVENT,
        osa_bus::HandlerMode::Sync,
        move |payload| {
            if payload["event"] == "signal_low_weight" {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        },
    );

    let outcome = process_message(&rt, "s1", "hi", ProcessOpts::default())
        .await
        .unwrap();

    // "hi" classifies low-weight but the loop still answers.
    match outcome {
        LoopOutcome::Answer(text) => {
            assert_eq!(text, "hello!");
            assert!(text.lines().count() < 4);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(low_weight_seen.load(std::sync::atomic::Ordering::SeqCst));

    let signal = rt
        .sessions
        .get("s1")
        .unwrap()
        .lock()
        .current_signal
        .clone()
        .unwrap();
    assert_eq!(signal.mode, Mode::Assist);
    assert_eq!(signal.genre, Genre::Inform);
    assert_eq!(signal.msg_type, MsgType::General);
    assert!((0.2..0.4).contains(&signal.weight), "weight {}", signal.weight);
}

#[tokio::test]
async fn empty_input_is_noise_but_still_processed() {
    let dir = tempfile::tempdir().unwrap();
    let (rt, _) = runtime_with(dir.path(), vec![Step::text("yes?")]);

    let reasons = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let sink = reasons.clone();
    rt.bus.subscribe(
        osa_bus::topics::SYSTEM_EVENT,
        osa_bus::HandlerMode::Sync,
        move |payload| {
            if payload["event"] == "signal_low_weight" {
                if let Some(r) = payload.pointer("/verdict/reason").and_then(|v| v.as_str()) {
                    sink.lock().push(r.to_owned());
                }
            }
        },
    );

    let outcome = process_message(&rt, "s1", "", ProcessOpts::default())
        .await
        .unwrap();
    assert!(matches!(outcome, LoopOutcome::Answer(_)));
    assert_eq!(*reasons.lock(), vec!["empty".to_owned()]);
    // The empty user message was still appended.
    assert_eq!(rt.transcripts.recall("s1").unwrap().len(), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2 — tool round-trip
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn echo_tool_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (rt, _) = runtime_with(
        dir.path(),
        vec![
            Step::tool_call("echo", serde_json::json!({"text": "abc"})),
            Step::text("the echo returned abc"),
        ],
    );

    let outcome = process_message(
        &rt,
        "s1",
        "Please call echo with text 'abc'",
        ProcessOpts::default(),
    )
    .await
    .unwrap();

    match outcome {
        LoopOutcome::Answer(text) => assert!(text.contains("abc")),
        other => panic!("unexpected outcome {other:?}"),
    }

    // Message sequence: user, assistant(tool_calls), tool("abc"), assistant.
    let messages = rt.sessions.get("s1").unwrap().lock().messages.clone();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(messages[1].tool_calls[0].name, "echo");
    assert_eq!(messages[2].text(), "abc");
    assert_eq!(
        messages[2].tool_call_id.as_deref(),
        Some(messages[1].tool_calls[0].id.as_str())
    );

    // The transcript on disk matches the in-memory view.
    let persisted = rt.transcripts.recall("s1").unwrap();
    assert_eq!(persisted.len(), 4);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3 — context compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn pressure_triggers_compaction_with_summary_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.context.max_context_tokens = 2_000;
    config.context.response_reserve = 100;

    let scripted = ScriptedProvider::new(vec![
        Step::text("summary of earlier turns"),
        Step::text("done"),
    ]);
    let providers = ProviderRegistry::single("scripted", Arc::new(scripted.clone()));
    let rt = AgentRuntime::bootstrap(config, providers).unwrap();

    // Seed ~97% of the conversation budget (1900 tokens).
    for i in 0..25 {
        rt.transcripts
            .append("s1", &Message::user(format!("q{i} {}", "pad ".repeat(25))))
            .unwrap();
        rt.transcripts
            .append("s1", &Message::assistant(format!("a{i} {}", "pad ".repeat(25))))
            .unwrap();
    }

    process_message(&rt, "s1", "and now a new question", ProcessOpts::default())
        .await
        .unwrap();

    let messages = rt.sessions.get("s1").unwrap().lock().messages.clone();
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[0].text().contains("summary of earlier turns"));

    // Tokens dropped well below budget.
    let tokens = osa_context::estimate_tokens_messages(&messages);
    assert!((tokens as f64) < 1_900.0 * 0.6, "still at {tokens} tokens");

    // The new user message survived verbatim (assistant reply follows it).
    let user_positions: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(
        messages[*user_positions.last().unwrap()].text(),
        "and now a new question"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5 — cancellation mid-tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SlowTool;

#[async_trait::async_trait]
impl osa_tools::ToolHandler for SlowTool {
    async fn run(&self, _args: serde_json::Value) -> osa_domain::Result<String> {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        Ok("slow output".into())
    }
}

#[tokio::test]
async fn cancellation_mid_tool_discards_partial_round() {
    let dir = tempfile::tempdir().unwrap();
    let (rt, _) = runtime_with(
        dir.path(),
        vec![
            Step::tool_call("slow", serde_json::json!({})),
            Step::text("never reached"),
        ],
    );
    rt.tools.register(
        osa_domain::message::ToolDefinition {
            name: "slow".into(),
            description: "sleeps two seconds".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        },
        Arc::new(SlowTool),
    );

    let rt2 = rt.clone();
    let handle = tokio::spawn(async move {
        process_message(&rt2, "s1", "run the slow tool", ProcessOpts::default()).await
    });

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert!(rt.cancel_session("s1"));

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));

    // Nothing from the aborted round was persisted: only the user line.
    let persisted = rt.transcripts.recall("s1").unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].role, Role::User);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6 — provider overflow retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn overflow_compacts_and_retries_up_to_three_times() {
    let dir = tempfile::tempdir().unwrap();
    let (rt, scripted) = runtime_with(
        dir.path(),
        vec![Step::overflow(), Step::overflow(), Step::text("recovered")],
    );

    let outcome = process_message(&rt, "s1", "a question", ProcessOpts::default())
        .await
        .unwrap();
    match outcome {
        LoopOutcome::Answer(text) => assert_eq!(text, "recovered"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(scripted.request_count(), 3);

    // Usage recorded reflects the successful call only.
    let session = rt.sessions.get("s1").unwrap();
    let s = session.lock();
    assert_eq!(s.total_input_tokens, 10);
    assert_eq!(s.total_output_tokens, 5);
}

#[tokio::test]
async fn overflow_four_times_surfaces_the_error() {
    let dir = tempfile::tempdir().unwrap();
    let (rt, _) = runtime_with(
        dir.path(),
        vec![
            Step::overflow(),
            Step::overflow(),
            Step::overflow(),
            Step::overflow(),
        ],
    );
    let result = process_message(&rt, "s1", "a question", ProcessOpts::default()).await;
    assert!(matches!(result, Err(Error::ContextOverflow)));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Iteration cap & re-entrance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn iteration_cap_returns_canned_message() {
    let dir = tempfile::tempdir().unwrap();
    // Every step is a tool call — the loop can never finish on its own.
    let steps: Vec<Step> = (0..5)
        .map(|_| Step::tool_call("echo", serde_json::json!({"text": "x"})))
        .collect();
    let (rt, scripted) = runtime_with(dir.path(), steps);

    let opts = ProcessOpts {
        max_iterations: Some(3),
        ..Default::default()
    };
    let outcome = process_message(&rt, "s1", "loop forever", opts).await.unwrap();
    match outcome {
        LoopOutcome::Answer(text) => {
            assert!(text.contains("reasoning limit"), "got: {text}")
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    // Exactly max_iterations provider calls were made.
    assert_eq!(scripted.request_count(), 3);
}

#[tokio::test]
async fn final_answer_one_iteration_under_the_cap_is_normal() {
    let dir = tempfile::tempdir().unwrap();
    let (rt, scripted) = runtime_with(
        dir.path(),
        vec![
            Step::tool_call("echo", serde_json::json!({"text": "x"})),
            Step::text("finished"),
        ],
    );
    let opts = ProcessOpts {
        max_iterations: Some(3),
        ..Default::default()
    };
    let outcome = process_message(&rt, "s1", "two rounds", opts).await.unwrap();
    match outcome {
        LoopOutcome::Answer(text) => assert_eq!(text, "finished"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(scripted.request_count(), 2);
}

#[tokio::test]
async fn sessions_are_reentrant_with_prior_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let (rt, scripted) = runtime_with(
        dir.path(),
        vec![Step::text("first answer"), Step::text("second answer")],
    );

    process_message(&rt, "s1", "first message", ProcessOpts::default())
        .await
        .unwrap();
    process_message(&rt, "s1", "second message", ProcessOpts::default())
        .await
        .unwrap();

    // The second provider call saw the first exchange in its messages.
    let second_req = &scripted.requests()[1];
    let texts: Vec<&str> = second_req.messages.iter().map(|m| m.text()).collect();
    assert!(texts.iter().any(|t| t.contains("first message")));
    assert!(texts.iter().any(|t| t.contains("first answer")));
    assert!(texts.iter().any(|t| t.contains("second message")));

    // No two consecutive assistant messages without tool pairing.
    let messages = rt.sessions.get("s1").unwrap().lock().messages.clone();
    for pair in messages.windows(2) {
        if pair[0].role == Role::Assistant && pair[1].role == Role::Assistant {
            assert!(
                !pair[0].tool_calls.is_empty(),
                "consecutive assistant messages without tool round"
            );
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn heavy_build_signal_enters_plan_mode() {
    let dir = tempfile::tempdir().unwrap();
    // Long + urgent + question + build keywords → fallback weight well
    // above the 0.75 plan threshold.
    let message = format!(
        "urgent: build the full deployment pipeline, ok? {}",
        "with staging and production environments ".repeat(8)
    );
    let (rt, _) = runtime_with(
        dir.path(),
        vec![Step::text("1. do this\n2. do that"), Step::text("executed")],
    );

    let outcome = process_message(&rt, "s1", &message, ProcessOpts::default())
        .await
        .unwrap();
    let plan = match outcome {
        LoopOutcome::Plan { text, signal } => {
            assert_eq!(signal.mode, Mode::Build);
            assert!(signal.weight >= 0.75);
            text
        }
        other => panic!("expected plan, got {other:?}"),
    };
    assert!(plan.contains("do this"));

    // No assistant message was appended by plan mode.
    let persisted = rt.transcripts.recall("s1").unwrap();
    assert!(persisted.iter().all(|m| m.role != Role::Assistant));

    // Approved: re-invoke with skip_plan. The user message is not
    // duplicated in the log.
    let opts = ProcessOpts {
        skip_plan: true,
        approved_plan: Some(plan),
        ..Default::default()
    };
    let outcome = process_message(&rt, "s1", &message, opts).await.unwrap();
    match outcome {
        LoopOutcome::Answer(text) => assert_eq!(text, "executed"),
        other => panic!("unexpected outcome {other:?}"),
    }
    let persisted = rt.transcripts.recall("s1").unwrap();
    let user_count = persisted.iter().filter(|m| m.role == Role::User).count();
    assert_eq!(user_count, 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook blocking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn blocked_tool_call_is_folded_into_conversation() {
    let dir = tempfile::tempdir().unwrap();
    // The model calls echo without its required argument; the integrity
    // hook blocks, the error goes back as the tool result, and the model
    // recovers.
    let scripted = ScriptedProvider::new(vec![
        Step::tool_call("echo", serde_json::json!({"wrong_key": 1})),
        Step::text("I'll try differently"),
    ]);
    let providers = ProviderRegistry::single("scripted", Arc::new(scripted.clone()));
    let rt = AgentRuntime::bootstrap(test_config(dir.path()), providers).unwrap();

    let outcome = process_message(&rt, "s1", "call echo badly", ProcessOpts::default())
        .await
        .unwrap();
    match outcome {
        LoopOutcome::Answer(text) => assert_eq!(text, "I'll try differently"),
        other => panic!("unexpected outcome {other:?}"),
    }

    let messages = rt.sessions.get("s1").unwrap().lock().messages.clone();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.text().starts_with("Error:"));
    assert!(tool_msg.text().contains("missing required argument"));
}
