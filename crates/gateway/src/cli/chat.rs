//! `osa chat` — interactive REPL.
//!
//! Reads lines with editing/history, forwards text to the agent loop
//! (or orchestrator for complex tasks), and renders responses. A leading
//! `/` selects a slash command. Ctrl+C during a turn cancels it at the
//! loop's next checkpoint.

use osa_context::estimate_tokens_messages;
use osa_domain::signal::ChannelKind;
use osa_runtime::{respond, ProcessOpts, RespondOutcome};

use crate::state::AppState;

pub async fn chat(state: AppState, session_id: Option<String>) -> anyhow::Result<()> {
    crate::bootstrap::spawn_background_tasks(&state);

    let mut session_id = session_id.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    let mut model: Option<String> = None;

    let history_path = state.rt.config.state_dir().join("cli_history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    eprintln!("osa interactive chat");
    eprintln!("Session: {session_id}  |  /help for commands, Ctrl+D to exit");
    eprintln!();

    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if trimmed.starts_with('/') {
                    if handle_slash_command(&state, trimmed, &mut session_id, &mut model) {
                        break;
                    }
                    continue;
                }

                if let Err(e) = send_message(&state, &session_id, &model, trimmed, &mut rl).await {
                    eprintln!("\x1B[31merror: {e}\x1B[0m");
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    rl.save_history(&history_path).ok();
    eprintln!("Goodbye!");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slash commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Returns `true` if the REPL should exit.
fn handle_slash_command(
    state: &AppState,
    input: &str,
    session_id: &mut String,
    model: &mut Option<String>,
) -> bool {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim());

    match cmd {
        "/exit" | "/quit" => return true,

        "/clear" => {
            eprint!("\x1B[2J\x1B[1;1H");
        }

        "/model" => match arg.filter(|s| !s.is_empty()) {
            Some(name) => {
                *model = Some(name.to_owned());
                eprintln!("Model set to: {name}");
            }
            None => {
                eprintln!("Current model: {}", model.as_deref().unwrap_or("(default)"));
                eprintln!("Usage: /model <name>");
            }
        },

        "/status" => {
            let snap = state.progress.snapshot(session_id);
            eprintln!(
                "elapsed: {}ms  tools: {}  tokens: {} in / {} out  action: {}",
                snap.elapsed_ms,
                snap.tool_count,
                snap.input_tokens,
                snap.output_tokens,
                snap.current_action,
            );
            for agent in &snap.agent_summaries {
                eprintln!(
                    "  agent {}: {} ({} tools, {} tokens)",
                    agent.name, agent.status, agent.tool_uses, agent.tokens_used
                );
            }
        }

        "/usage" => match state.rt.sessions.get(session_id) {
            Some(session) => {
                let s = session.lock();
                eprintln!(
                    "session tokens: {} in / {} out  conversation: {} messages (~{} tokens)",
                    s.total_input_tokens,
                    s.total_output_tokens,
                    s.messages.len(),
                    estimate_tokens_messages(&s.messages),
                );
            }
            None => eprintln!("no active session yet"),
        },

        "/compact" => {
            let Some(session) = state.rt.sessions.get(session_id) else {
                eprintln!("no active session yet");
                return false;
            };
            let messages = session.lock().messages.clone();
            let before = estimate_tokens_messages(&messages);
            let rt = state.rt.clone();
            let sid = session_id.clone();
            // Compaction needs the provider; run it on the runtime.
            let handle = tokio::spawn(async move {
                let compacted = rt.compactor.force_compact(&sid, messages, &rt.bus).await;
                rt.transcripts.replace(&sid, &compacted).ok();
                if let Some(s) = rt.sessions.get(&sid) {
                    s.lock().messages = compacted.clone();
                }
                estimate_tokens_messages(&compacted)
            });
            let sid = session_id.clone();
            tokio::spawn(async move {
                if let Ok(after) = handle.await {
                    tracing::info!(session_id = %sid, before, after, "manual compaction done");
                    eprintln!("compacted: ~{before} → ~{after} tokens");
                }
            });
        }

        "/context" => {
            let report = osa_runtime::context_report(&state.rt, session_id);
            eprint!("{}", report.render_text());
        }

        "/session" => {
            if let Some(name) = arg.filter(|s| !s.is_empty()) {
                *session_id = name.to_owned();
                eprintln!("Session switched to: {session_id}");
            } else {
                eprintln!("Current session: {session_id}");
            }
        }

        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /model <name>    Set the model override");
            eprintln!("  /status          Progress snapshot for this session");
            eprintln!("  /usage           Token usage breakdown");
            eprintln!("  /compact         Force conversation compaction");
            eprintln!("  /context         Context assembler budget report");
            eprintln!("  /session <name>  Switch session");
            eprintln!("  /clear           Clear the screen");
            eprintln!("  /exit            Exit");
        }

        other => {
            eprintln!("Unknown command: {other}  (/help for a list)");
        }
    }

    false
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn send_message(
    state: &AppState,
    session_id: &str,
    model: &Option<String>,
    text: &str,
    rl: &mut rustyline::DefaultEditor,
) -> anyhow::Result<()> {
    let opts = ProcessOpts {
        channel: ChannelKind::Cli,
        model: model.clone(),
        ..Default::default()
    };

    let outcome = match run_cancellable(state, session_id, text, opts).await {
        Ok(outcome) => outcome,
        Err(
            osa_domain::Error::Provider { .. }
            | osa_domain::Error::Http(_)
            | osa_domain::Error::Timeout(_)
            | osa_domain::Error::ContextOverflow,
        ) => {
            eprintln!("I encountered an error processing your request. Please try again.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match outcome {
        Some(RespondOutcome::Answer(answer)) => {
            println!("{answer}");
            println!();
        }
        Some(RespondOutcome::Plan { text: plan, .. }) => {
            eprintln!("\x1B[33mProposed plan:\x1B[0m");
            println!("{plan}");
            let approved = matches!(
                rl.readline("approve and execute? [y/N] "),
                Ok(line) if line.trim().eq_ignore_ascii_case("y")
            );
            if !approved {
                eprintln!("(plan rejected; session unchanged)");
                return Ok(());
            }
            let opts = ProcessOpts {
                channel: ChannelKind::Cli,
                model: model.clone(),
                skip_plan: true,
                approved_plan: Some(plan),
                ..Default::default()
            };
            match run_cancellable(state, session_id, text, opts).await {
                Ok(Some(RespondOutcome::Answer(answer))) => {
                    println!("{answer}");
                    println!();
                }
                Ok(_) => eprintln!("(cancelled)"),
                Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
            }
        }
        Some(RespondOutcome::Task { task_id }) => {
            eprintln!("orchestrating as task {task_id}; /status for progress");
        }
        None => {
            eprintln!("(cancelled)");
        }
    }
    Ok(())
}

/// Run one turn, racing Ctrl+C against completion. Returns `None` when
/// the turn was cancelled.
async fn run_cancellable(
    state: &AppState,
    session_id: &str,
    text: &str,
    opts: ProcessOpts,
) -> Result<Option<RespondOutcome>, osa_domain::Error> {
    let rt = state.rt.clone();
    let orchestrator = state.orchestrator.clone();
    let sid = session_id.to_owned();
    let message = text.to_owned();

    let mut turn = tokio::spawn(async move {
        respond(&rt, &orchestrator, &sid, &message, opts, true).await
    });

    loop {
        tokio::select! {
            result = &mut turn => {
                return match result {
                    Ok(Ok(outcome)) => Ok(Some(outcome)),
                    Ok(Err(osa_domain::Error::Cancelled)) => Ok(None),
                    Ok(Err(e)) => Err(e),
                    Err(join_err) => Err(osa_domain::Error::Other(join_err.to_string())),
                };
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n(cancelling at next checkpoint...)");
                state.rt.cancel_session(session_id);
                // Keep waiting: the loop exits at its next checkpoint.
            }
        }
    }
}

/// One-shot classification (`osa classify <text>`).
pub async fn classify_once(
    state: &AppState,
    text: &str,
    channel: ChannelKind,
) -> anyhow::Result<()> {
    let signal = state.rt.classifier.classify(text, channel).await;
    println!("{}", serde_json::to_string_pretty(&signal)?);
    Ok(())
}
