//! The OSA runtime — the agent loop, compactor, orchestrator, progress
//! tracker, and session machinery, wired over the shared stores.

pub mod agent;
pub mod compactor;
pub mod orchestrator;
pub mod progress;
pub mod sessions;

use std::sync::Arc;

use parking_lot::RwLock;

use osa_bus::EventBus;
use osa_context::ContextAssembler;
use osa_domain::config::Config;
use osa_domain::error::Result;
use osa_domain::signal::Signal;
use osa_hooks::HookPipeline;
use osa_memory::{LongTermMemory, TranscriptStore};
use osa_providers::ProviderRegistry;
use osa_signal::{NoiseFilter, SignalClassifier};
use osa_tools::ToolRegistry;

pub use agent::{process_message, LoopOutcome, ProcessOpts};
pub use compactor::{Compactor, PressureLevel};
pub use orchestrator::{Analysis, Orchestrator, OrchestratorTask, SubTask, SubTaskRole};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use sessions::{CancelMap, CancelToken, SessionLockMap, SessionRegistry, SessionState};

const DEFAULT_IDENTITY: &str = "You are OSA, a local-first conversational agent. \
     You coordinate tools and specialist sub-agents on the user's machine \
     and answer on their channels. Be useful, be honest about failures, \
     and prefer doing over describing.";

/// Shared handle to every core subsystem. One instance per process;
/// cheap to share via `Arc`.
pub struct AgentRuntime {
    pub config: Arc<Config>,
    pub bus: EventBus,
    pub providers: Arc<ProviderRegistry>,
    pub classifier: Arc<SignalClassifier>,
    pub noise: Arc<NoiseFilter>,
    pub transcripts: Arc<TranscriptStore>,
    pub longterm: Arc<LongTermMemory>,
    pub assembler: Arc<ContextAssembler>,
    pub compactor: Arc<Compactor>,
    pub tools: Arc<ToolRegistry>,
    pub hooks: Arc<HookPipeline>,
    pub sessions: Arc<SessionRegistry>,
    pub locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,
    /// Rendered skills catalog for the context assembler (Tier 2).
    pub skills_catalog: RwLock<Option<String>>,
    pub identity: String,
    /// Best-effort git summary computed at startup.
    pub git_summary: String,
}

impl AgentRuntime {
    /// Wire the full runtime from config and an already-built provider
    /// registry. Must run inside a tokio runtime (the bus spawns its
    /// dispatch loop). Registers builtin tools and hooks, and loads
    /// markdown skills from `<state_dir>/skills`.
    pub fn bootstrap(config: Config, providers: ProviderRegistry) -> Result<Arc<Self>> {
        let state_dir = config.state_dir();
        std::fs::create_dir_all(&state_dir)?;

        let config = Arc::new(config);
        let providers = Arc::new(providers);
        let bus = EventBus::new(4, 256);

        let transcripts = Arc::new(TranscriptStore::new(&state_dir.join("sessions"))?);
        let longterm = Arc::new(LongTermMemory::new(&state_dir.join("memory.md")));

        let tools = Arc::new(ToolRegistry::new());
        osa_tools::register_builtins(&tools, longterm.clone());
        let skills = osa_tools::register_skills(
            &tools,
            providers.clone(),
            &state_dir.join("skills"),
        );
        let catalog = if skills.is_empty() {
            None
        } else {
            Some(osa_tools::render_catalog(&skills))
        };

        let hooks = Arc::new(HookPipeline::new());
        osa_hooks::register_builtins(&hooks, tools.clone(), &config.hooks);

        let classifier = Arc::new(SignalClassifier::new(
            config.classifier.clone(),
            providers.clone(),
        ));
        let noise = Arc::new(NoiseFilter::new(config.noise.clone()));
        let assembler = Arc::new(ContextAssembler::new(config.context.clone()));
        let compactor = Arc::new(Compactor::new(
            config.compaction.clone(),
            config.context.clone(),
            providers.clone(),
        ));

        Ok(Arc::new(Self {
            bus,
            providers,
            classifier,
            noise,
            transcripts,
            longterm,
            assembler,
            compactor,
            tools,
            hooks,
            sessions: Arc::new(SessionRegistry::new()),
            locks: Arc::new(SessionLockMap::new()),
            cancel_map: Arc::new(CancelMap::new()),
            skills_catalog: RwLock::new(catalog),
            identity: DEFAULT_IDENTITY.to_owned(),
            git_summary: compute_git_summary(),
            config,
        }))
    }

    /// Flip the cancellation flag for a session's running loop.
    pub fn cancel_session(&self, session_id: &str) -> bool {
        self.cancel_map.cancel(session_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a message was handled at the top level.
#[derive(Debug, Clone)]
pub enum RespondOutcome {
    Answer(String),
    Plan { text: String, signal: Signal },
    /// Orchestration started asynchronously.
    Task { task_id: uuid::Uuid },
}

/// Route one message: heavy multi-domain signals go through complexity
/// analysis and (when complex) the orchestrator; everything else runs
/// the plain agent loop.
pub async fn respond(
    rt: &Arc<AgentRuntime>,
    orchestrator: &Arc<Orchestrator>,
    session_id: &str,
    text: &str,
    opts: ProcessOpts,
    blocking: bool,
) -> Result<RespondOutcome> {
    // The classification is cached, so the loop's own classify call is
    // free afterwards.
    let signal = rt.classifier.classify(text, opts.channel).await;
    let worth_analyzing = signal.weight >= rt.config.noise.signal_threshold
        && matches!(
            signal.mode,
            osa_domain::Mode::Build | osa_domain::Mode::Execute | osa_domain::Mode::Maintain
        );

    if worth_analyzing && !rt.providers.is_empty() {
        if let Analysis::Complex(sub_tasks) = orchestrator.analyze(text).await {
            tracing::info!(
                session_id,
                sub_tasks = sub_tasks.len(),
                "decomposing into sub-agents"
            );
            if blocking {
                let (_task_id, synthesis) = orchestrator
                    .execute_blocking(text, session_id, opts.channel, sub_tasks)
                    .await?;
                return Ok(RespondOutcome::Answer(synthesis));
            }
            let task_id = orchestrator.execute(text, session_id, opts.channel, sub_tasks);
            return Ok(RespondOutcome::Task { task_id });
        }
    }

    match process_message(rt, session_id, text, opts).await? {
        LoopOutcome::Answer(text) => Ok(RespondOutcome::Answer(text)),
        LoopOutcome::Plan { text, signal } => Ok(RespondOutcome::Plan { text, signal }),
    }
}

/// Block-level context budget breakdown for a session (the `/context`
/// diagnostic). Uses the session's current signal, or a fallback when
/// the session has not classified anything yet.
pub fn context_report(
    rt: &Arc<AgentRuntime>,
    session_id: &str,
) -> osa_context::BudgetReport {
    let (signal, conversation) = match rt.sessions.get(session_id) {
        Some(state) => {
            let s = state.lock();
            (
                s.current_signal
                    .clone()
                    .unwrap_or_else(|| Signal::fallback("", osa_domain::ChannelKind::Cli)),
                s.messages.clone(),
            )
        }
        None => (
            Signal::fallback("", osa_domain::ChannelKind::Cli),
            Vec::new(),
        ),
    };
    let sources = agent::build_sources(rt, session_id, &signal.raw_text, &ProcessOpts::default());
    rt.assembler.token_budget(&sources, &signal, &conversation)
}

/// Branch, dirty-file count, and last commit — best effort, empty when
/// not in a git repository.
fn compute_git_summary() -> String {
    fn git(args: &[&str]) -> Option<String> {
        let out = std::process::Command::new("git").args(args).output().ok()?;
        if !out.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&out.stdout).trim().to_owned())
    }

    let Some(branch) = git(&["rev-parse", "--abbrev-ref", "HEAD"]) else {
        return String::new();
    };
    let modified = git(&["status", "--porcelain"])
        .map(|s| s.lines().count())
        .unwrap_or(0);
    let last = git(&["log", "-1", "--format=%h %s"]).unwrap_or_default();
    format!("{branch}, {modified} modified, last: {last}")
}
