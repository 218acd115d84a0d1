//! The multi-agent orchestrator — complexity analysis, task
//! decomposition, dependency-wave scheduling, parallel sub-agent
//! execution, and result synthesis.
//!
//! `execute` returns immediately with a task id; a manager task runs the
//! waves. Wave N+1 never starts before every sub-agent in wave N has a
//! recorded result. Sub-agent failures are isolated — synthesis always
//! runs over whatever results exist, with failure markers for the rest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use uuid::Uuid;

use osa_domain::config::ModelTier;
use osa_domain::error::{Error, Result};
use osa_domain::message::Message;
use osa_domain::signal::ChannelKind;
use osa_providers::ChatRequest;

use crate::agent::{process_message, LoopOutcome, ProcessOpts};
use crate::AgentRuntime;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Data model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskRole {
    Lead,
    Backend,
    Frontend,
    Data,
    Design,
    Infra,
    Qa,
    RedTeam,
    Services,
}

impl SubTaskRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lead" => Some(Self::Lead),
            "backend" => Some(Self::Backend),
            "frontend" => Some(Self::Frontend),
            "data" => Some(Self::Data),
            "design" => Some(Self::Design),
            "infra" => Some(Self::Infra),
            "qa" => Some(Self::Qa),
            "red_team" | "redteam" => Some(Self::RedTeam),
            "services" => Some(Self::Services),
            _ => None,
        }
    }

    /// Role-specific system prompt for the sub-agent loop.
    pub fn system_prompt(self) -> &'static str {
        match self {
            Self::Lead => "You are the lead agent. Coordinate, decide, and keep scope tight.",
            Self::Backend => "You are a backend specialist. Design and implement server-side logic.",
            Self::Frontend => "You are a frontend specialist. Build user-facing surfaces.",
            Self::Data => "You are a data specialist. Design schemas, queries, and pipelines.",
            Self::Design => "You are a design specialist. Produce clear, minimal designs.",
            Self::Infra => "You are an infrastructure specialist. Handle deploys, networking, and ops.",
            Self::Qa => "You are a QA specialist. Find defects and write tests.",
            Self::RedTeam => "You are a red-team specialist. Attack assumptions and probe for failures.",
            Self::Services => "You are an integrations specialist. Wire external services.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub name: String,
    pub description: String,
    pub role: SubTaskRole,
    #[serde(default)]
    pub tools_needed: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub id: String,
    pub task_id: Uuid,
    pub name: String,
    pub role: SubTaskRole,
    pub status: AgentStatus,
    pub tool_uses: u32,
    pub tokens_used: u64,
    pub current_action: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Appraisal {
    pub estimated_cost_usd: f64,
    pub estimated_hours: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorTask {
    pub task_id: Uuid,
    pub original_message: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub sub_tasks: Vec<SubTask>,
    pub agents: HashMap<String, AgentState>,
    pub results: HashMap<String, String>,
    /// Wave names not yet executed (for progress queries).
    pub pending_waves: Vec<Vec<String>>,
    pub current_wave: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appraisal: Option<Appraisal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of complexity analysis.
#[derive(Debug, Clone)]
pub enum Analysis {
    Simple,
    Complex(Vec<SubTask>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wave computation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Topological grouping: each wave is the set of tasks whose
/// dependencies are all resolved. Cyclic or unresolvable remainders go
/// into one terminal wave (forced parallel) — never block.
pub fn compute_waves(sub_tasks: &[SubTask]) -> Vec<Vec<SubTask>> {
    let known: HashSet<&str> = sub_tasks.iter().map(|t| t.name.as_str()).collect();
    let mut remaining: Vec<SubTask> = sub_tasks.to_vec();
    let mut resolved: HashSet<String> = HashSet::new();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<SubTask>, Vec<SubTask>) =
            remaining.into_iter().partition(|t| {
                t.depends_on
                    .iter()
                    .filter(|d| known.contains(d.as_str()))
                    .all(|d| resolved.contains(d))
            });

        if ready.is_empty() {
            tracing::warn!(
                remaining = blocked.len(),
                "cyclic or unresolvable dependencies; forcing terminal wave"
            );
            waves.push(blocked);
            break;
        }

        for t in &ready {
            resolved.insert(t.name.clone());
        }
        waves.push(ready);
        remaining = blocked;
    }

    waves
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    rt: Arc<AgentRuntime>,
    tasks: RwLock<HashMap<Uuid, Arc<Mutex<OrchestratorTask>>>>,
}

impl Orchestrator {
    pub fn new(rt: Arc<AgentRuntime>) -> Self {
        Self {
            rt,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    // ── analyze ───────────────────────────────────────────────────

    /// One low-temperature provider call deciding whether the message
    /// needs decomposition. Any parsing or LLM failure yields `Simple`.
    pub async fn analyze(&self, message: &str) -> Analysis {
        let max_agents = self.rt.config.orchestrator.effective_max_agents();
        let prompt = format!(
            "Decide whether this request needs multiple specialist agents or a \
             single agent. Respond with ONLY a JSON object:\n\
             {{\"complexity\": \"simple\"}} — one agent suffices, or\n\
             {{\"complexity\": \"complex\", \"sub_tasks\": [{{\"name\": \"...\", \
             \"description\": \"...\", \"role\": \"lead|backend|frontend|data|design|infra|qa|red_team|services\", \
             \"tools_needed\": [], \"depends_on\": []}}]}}\n\
             Use at most {max_agents} sub-tasks. `depends_on` lists names of \
             sub-tasks whose output this one needs.\n\n\
             Request: {message}"
        );
        let req = ChatRequest {
            messages: vec![Message::user(prompt)],
            temperature: Some(0.1),
            max_tokens: Some(1_200),
            ..Default::default()
        };

        let resp = match self.rt.providers.chat_tier(ModelTier::Specialist, req).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "complexity analysis failed; treating as simple");
                return Analysis::Simple;
            }
        };

        match parse_decomposition(&resp.content, max_agents) {
            Some(tasks) if !tasks.is_empty() => Analysis::Complex(tasks),
            _ => Analysis::Simple,
        }
    }

    // ── execute ───────────────────────────────────────────────────

    /// Start asynchronous execution. Returns the task id immediately.
    pub fn execute(
        self: &Arc<Self>,
        message: &str,
        session_id: &str,
        channel: ChannelKind,
        sub_tasks: Vec<SubTask>,
    ) -> Uuid {
        let task_id = Uuid::new_v4();
        let waves = compute_waves(&sub_tasks);

        let mut agents = HashMap::new();
        for st in &sub_tasks {
            let agent_id = format!("{task_id}:{}", st.name);
            agents.insert(
                agent_id.clone(),
                AgentState {
                    id: agent_id,
                    task_id,
                    name: st.name.clone(),
                    role: st.role,
                    status: AgentStatus::Pending,
                    tool_uses: 0,
                    tokens_used: 0,
                    current_action: "pending".into(),
                    started_at: None,
                    completed_at: None,
                    result: None,
                    error: None,
                },
            );
        }

        let task = Arc::new(Mutex::new(OrchestratorTask {
            task_id,
            original_message: message.to_owned(),
            session_id: session_id.to_owned(),
            status: TaskStatus::Running,
            sub_tasks: sub_tasks.clone(),
            agents,
            results: HashMap::new(),
            pending_waves: waves
                .iter()
                .map(|w| w.iter().map(|t| t.name.clone()).collect())
                .collect(),
            current_wave: 0,
            synthesis: None,
            appraisal: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }));
        self.tasks.write().insert(task_id, task.clone());

        self.rt.cancel_map.register(&task_key(task_id));

        self.rt.bus.emit_system(
            "orchestrator_task_started",
            serde_json::json!({
                "task_id": task_id,
                "session_id": session_id,
            }),
        );
        self.rt.bus.emit_system(
            "orchestrator_agents_spawning",
            serde_json::json!({
                "task_id": task_id,
                "session_id": session_id,
                "agent_count": sub_tasks.len(),
                "agents": sub_tasks
                    .iter()
                    .map(|t| serde_json::json!({"name": t.name, "role": t.role}))
                    .collect::<Vec<_>>(),
            }),
        );

        let this = self.clone();
        let channel_copy = channel;
        tokio::spawn(async move {
            let timeout =
                std::time::Duration::from_millis(this.rt.config.orchestrator.timeout_ms);
            let run = this.run_task(task.clone(), waves, channel_copy);
            match tokio::time::timeout(timeout, run).await {
                Ok(()) => {}
                Err(_) => {
                    this.rt.cancel_map.cancel(&task_key(task_id));
                    this.finish_task(&task, TaskStatus::Failed, Some("timeout".into()));
                }
            }
            this.rt.cancel_map.remove(&task_key(task_id));
        });

        task_id
    }

    /// Blocking variant: run to completion and return the synthesis.
    pub async fn execute_blocking(
        self: &Arc<Self>,
        message: &str,
        session_id: &str,
        channel: ChannelKind,
        sub_tasks: Vec<SubTask>,
    ) -> Result<(Uuid, String)> {
        let task_id = self.execute(message, session_id, channel, sub_tasks);
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let snapshot = self
                .progress(&task_id)
                .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
            match snapshot.status {
                TaskStatus::Running => continue,
                TaskStatus::Completed => {
                    return Ok((task_id, snapshot.synthesis.unwrap_or_default()));
                }
                TaskStatus::Failed => {
                    return Err(Error::Other(
                        snapshot.error.unwrap_or_else(|| "orchestrator task failed".into()),
                    ));
                }
            }
        }
    }

    // ── queries ───────────────────────────────────────────────────

    pub fn progress(&self, task_id: &Uuid) -> Option<OrchestratorTask> {
        self.tasks.read().get(task_id).map(|t| t.lock().clone())
    }

    pub fn list_tasks(&self) -> Vec<Value> {
        let mut summaries: Vec<(DateTime<Utc>, Value)> = self
            .tasks
            .read()
            .values()
            .map(|t| {
                let t = t.lock();
                (
                    t.started_at,
                    serde_json::json!({
                        "task_id": t.task_id,
                        "status": t.status,
                        "session_id": t.session_id,
                        "agent_count": t.agents.len(),
                        "started_at": t.started_at,
                        "completed_at": t.completed_at,
                    }),
                )
            })
            .collect();
        summaries.sort_by(|a, b| b.0.cmp(&a.0));
        summaries.into_iter().map(|(_, v)| v).collect()
    }

    /// Cancel a running task: current and subsequent waves stop; recorded
    /// results are preserved.
    pub fn cancel(&self, task_id: &Uuid) -> bool {
        self.rt.cancel_map.cancel(&task_key(*task_id))
    }

    /// Drop completed tasks past the retention window.
    pub fn evict_terminal(&self, retention: std::time::Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, t| {
            let t = t.lock();
            t.status == TaskStatus::Running || t.completed_at.map_or(true, |ts| ts > cutoff)
        });
        before - tasks.len()
    }

    // ── manager ───────────────────────────────────────────────────

    async fn run_task(
        self: &Arc<Self>,
        task: Arc<Mutex<OrchestratorTask>>,
        waves: Vec<Vec<SubTask>>,
        channel: ChannelKind,
    ) {
        let (task_id, session_id, original_message) = {
            let t = task.lock();
            (t.task_id, t.session_id.clone(), t.original_message.clone())
        };
        let parent_key = task_key(task_id);

        // Optional appraisal before the first wave; failure is non-fatal.
        if self.rt.config.orchestrator.appraisal_enabled {
            if let Some(appraisal) = self.appraise(&original_message).await {
                self.rt.bus.emit_system(
                    "orchestrator_task_appraised",
                    serde_json::json!({
                        "task_id": task_id,
                        "session_id": session_id,
                        "estimated_cost_usd": appraisal.estimated_cost_usd,
                        "estimated_hours": appraisal.estimated_hours,
                    }),
                );
                task.lock().appraisal = Some(appraisal);
            }
        }

        for (wave_idx, wave) in waves.into_iter().enumerate() {
            if self.rt.cancel_map.is_cancelled(&parent_key) {
                self.finish_task(&task, TaskStatus::Failed, Some("cancelled".into()));
                return;
            }

            {
                let mut t = task.lock();
                t.current_wave = wave_idx;
                if !t.pending_waves.is_empty() {
                    t.pending_waves.remove(0);
                }
            }
            self.rt.bus.emit_system(
                "orchestrator_wave_started",
                serde_json::json!({
                    "task_id": task_id,
                    "session_id": session_id,
                    "wave": wave_idx,
                    "agents": wave.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
                }),
            );

            self.run_wave(&task, wave, channel, &parent_key).await;
        }

        // ── Synthesis — always runs, over whatever results exist ────
        let results = { task.lock().results.clone() };
        let synthesis = self
            .synthesize(&original_message, &results)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "synthesis failed; falling back to concatenation");
                concat_results(&results)
            });
        task.lock().synthesis = Some(synthesis);

        let cancelled = self.rt.cancel_map.is_cancelled(&parent_key);
        let any_failed = {
            let t = task.lock();
            t.agents.values().any(|a| a.status == AgentStatus::Failed)
        };
        if cancelled {
            self.finish_task(&task, TaskStatus::Failed, Some("cancelled".into()));
        } else if any_failed && { task.lock().results.is_empty() } {
            self.finish_task(&task, TaskStatus::Failed, Some("all sub-agents failed".into()));
        } else {
            self.finish_task(&task, TaskStatus::Completed, None);
        }
    }

    async fn run_wave(
        self: &Arc<Self>,
        task: &Arc<Mutex<OrchestratorTask>>,
        wave: Vec<SubTask>,
        channel: ChannelKind,
        parent_key: &str,
    ) {
        let (task_id, session_id) = {
            let t = task.lock();
            (t.task_id, t.session_id.clone())
        };

        let mut join_set: JoinSet<std::result::Result<String, String>> = JoinSet::new();
        // future handle → (agent_id, sub_task_name); freed as each
        // worker completes.
        let mut wave_refs: HashMap<tokio::task::Id, (String, String)> = HashMap::new();
        let mut monitors = Vec::new();

        for st in wave {
            let agent_id = format!("{task_id}:{}", st.name);
            let worker_session = format!("task:{task_id}:{}", st.name);
            self.rt.cancel_map.add_to_group(parent_key, &worker_session);

            {
                let mut t = task.lock();
                if let Some(a) = t.agents.get_mut(&agent_id) {
                    a.status = AgentStatus::Running;
                    a.started_at = Some(Utc::now());
                    a.current_action = "starting".into();
                }
            }
            self.rt.bus.emit_system(
                "orchestrator_agent_started",
                serde_json::json!({
                    "task_id": task_id,
                    "session_id": session_id,
                    "agent_id": agent_id,
                    "name": st.name,
                    "role": st.role,
                }),
            );

            // Dependency results become prior context for the worker.
            let dep_context = {
                let t = task.lock();
                let parts: Vec<String> = st
                    .depends_on
                    .iter()
                    .filter_map(|dep| {
                        t.results
                            .get(dep)
                            .map(|r| format!("### Result of '{dep}'\n{r}"))
                    })
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n\n"))
                }
            };

            let rt = self.rt.clone();
            let description = st.description.clone();
            let tools_needed = st.tools_needed.clone();
            let role = st.role;
            let ws = worker_session.clone();
            let handle = join_set.spawn(async move {
                let opts = ProcessOpts {
                    channel,
                    skip_plan: true,
                    role_prompt: Some(role.system_prompt().to_owned()),
                    tool_filter: if tools_needed.is_empty() {
                        None
                    } else {
                        Some(tools_needed)
                    },
                    extra_context: dep_context,
                    direct_tool_dispatch: true,
                    max_iterations: Some(10),
                    ..Default::default()
                };
                match process_message(&rt, &ws, &description, opts).await {
                    Ok(LoopOutcome::Answer(text)) => Ok(text),
                    Ok(LoopOutcome::Plan { text, .. }) => Ok(text),
                    Err(e) => Err(e.to_string()),
                }
            });
            wave_refs.insert(handle.id(), (agent_id.clone(), st.name.clone()));

            // Progress sampler: reads the worker session's counters until
            // the agent completes.
            monitors.push(self.spawn_monitor(task.clone(), agent_id, worker_session));
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            let (handle_id, outcome) = match joined {
                Ok((id, out)) => (id, out),
                Err(join_err) => {
                    let id = join_err.id();
                    (id, Err(format!("worker panicked: {join_err}")))
                }
            };
            let (agent_id, name) = match wave_refs.remove(&handle_id) {
                Some(pair) => pair,
                None => continue,
            };

            let mut t = task.lock();
            match outcome {
                Ok(text) => {
                    t.results.insert(name.clone(), text.clone());
                    if let Some(a) = t.agents.get_mut(&agent_id) {
                        a.status = AgentStatus::Completed;
                        a.completed_at = Some(Utc::now());
                        a.current_action = "done".into();
                        a.result = Some(text);
                    }
                    drop(t);
                    self.rt.bus.emit_system(
                        "orchestrator_agent_completed",
                        serde_json::json!({
                            "task_id": task_id,
                            "session_id": session_id,
                            "agent_id": agent_id,
                            "name": name,
                        }),
                    );
                }
                Err(err) => {
                    // Failure is isolated to this agent; the wave goes on.
                    if let Some(a) = t.agents.get_mut(&agent_id) {
                        a.status = AgentStatus::Failed;
                        a.completed_at = Some(Utc::now());
                        a.current_action = "failed".into();
                        a.error = Some(err.clone());
                    }
                    drop(t);
                    self.rt.bus.emit_system(
                        "orchestrator_agent_failed",
                        serde_json::json!({
                            "task_id": task_id,
                            "session_id": session_id,
                            "agent_id": agent_id,
                            "name": name,
                            "error": err,
                        }),
                    );
                }
            }
        }

        for m in monitors {
            m.abort();
        }
    }

    fn spawn_monitor(
        &self,
        task: Arc<Mutex<OrchestratorTask>>,
        agent_id: String,
        worker_session: String,
    ) -> tokio::task::JoinHandle<()> {
        let rt = self.rt.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(250));
            loop {
                interval.tick().await;
                let Some(session) = rt.sessions.get(&worker_session) else {
                    continue;
                };
                let (tool_uses, tokens, action, task_id, session_id) = {
                    let s = session.lock();
                    let tool_uses = s
                        .messages
                        .iter()
                        .map(|m| m.tool_calls.len() as u32)
                        .sum::<u32>();
                    let tokens = s.total_input_tokens + s.total_output_tokens;
                    let action = format!("{:?}", s.status).to_lowercase();
                    let t = task.lock();
                    (tool_uses, tokens, action, t.task_id, t.session_id.clone())
                };
                {
                    let mut t = task.lock();
                    let done = match t.agents.get_mut(&agent_id) {
                        Some(a) => {
                            a.tool_uses = tool_uses;
                            a.tokens_used = tokens;
                            a.current_action = action.clone();
                            matches!(a.status, AgentStatus::Completed | AgentStatus::Failed)
                        }
                        None => true,
                    };
                    if done {
                        return;
                    }
                }
                rt.bus.emit_system(
                    "orchestrator_agent_progress",
                    serde_json::json!({
                        "task_id": task_id,
                        "session_id": session_id,
                        "agent_id": agent_id,
                        "tool_uses": tool_uses,
                        "tokens_used": tokens,
                        "current_action": action,
                    }),
                );
            }
        })
    }

    fn finish_task(
        &self,
        task: &Arc<Mutex<OrchestratorTask>>,
        status: TaskStatus,
        error: Option<String>,
    ) {
        let (task_id, session_id) = {
            let mut t = task.lock();
            if t.completed_at.is_some() {
                return;
            }
            t.status = status;
            t.error = error.clone();
            t.completed_at = Some(Utc::now());
            (t.task_id, t.session_id.clone())
        };
        let tag = match status {
            TaskStatus::Completed => "orchestrator_task_completed",
            _ => "orchestrator_task_failed",
        };
        self.rt.bus.emit_system(
            tag,
            serde_json::json!({
                "task_id": task_id,
                "session_id": session_id,
                "error": error,
            }),
        );
    }

    // ── provider steps ────────────────────────────────────────────

    async fn appraise(&self, message: &str) -> Option<Appraisal> {
        let prompt = format!(
            "Estimate the effort for this task. Respond with ONLY a JSON \
             object: {{\"estimated_cost_usd\": <number>, \"estimated_hours\": <number>}}\n\n\
             Task: {message}"
        );
        let req = ChatRequest {
            messages: vec![Message::user(prompt)],
            temperature: Some(0.1),
            max_tokens: Some(200),
            ..Default::default()
        };
        let resp = self
            .rt
            .providers
            .chat_tier(ModelTier::Utility, req)
            .await
            .ok()?;
        let v: Value = serde_json::from_str(resp.content.trim()).ok()?;
        Some(Appraisal {
            estimated_cost_usd: v.get("estimated_cost_usd")?.as_f64()?,
            estimated_hours: v.get("estimated_hours")?.as_f64()?,
        })
    }

    async fn synthesize(
        &self,
        original_message: &str,
        results: &HashMap<String, String>,
    ) -> Result<String> {
        let mut labeled = String::new();
        let mut names: Vec<&String> = results.keys().collect();
        names.sort();
        for name in names {
            labeled.push_str(&format!("## {name}\n{}\n\n", results[name]));
        }

        let prompt = format!(
            "Multiple specialist agents worked on this request:\n{original_message}\n\n\
             Their outputs, labeled by sub-task:\n\n{labeled}\
             Synthesize one unified response to the original request. \
             Reference each sub-task's contribution; note any gaps from \
             failed sub-tasks."
        );
        let req = ChatRequest {
            messages: vec![Message::user(prompt)],
            temperature: Some(0.3),
            ..Default::default()
        };
        let resp = self.rt.providers.chat_tier(ModelTier::Elite, req).await?;
        Ok(resp.content)
    }
}

fn task_key(task_id: Uuid) -> String {
    format!("task:{task_id}")
}

/// Deterministic synthesis fallback.
fn concat_results(results: &HashMap<String, String>) -> String {
    let mut names: Vec<&String> = results.keys().collect();
    names.sort();
    names
        .iter()
        .map(|name| format!("## {name}\n{}", results[*name]))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Parse the analysis response. Returns `None` for anything other than a
/// well-formed complex decomposition with valid roles.
fn parse_decomposition(content: &str, max_agents: usize) -> Option<Vec<SubTask>> {
    let v: Value = serde_json::from_str(content.trim())
        .ok()
        .or_else(|| extract_json_object(content))?;

    if v.get("complexity").and_then(|c| c.as_str()) != Some("complex") {
        return None;
    }

    let raw = v.get("sub_tasks")?.as_array()?;
    let mut tasks = Vec::new();
    let mut seen = HashSet::new();
    for item in raw.iter().take(max_agents) {
        let name = item.get("name")?.as_str()?.trim().to_owned();
        if name.is_empty() || !seen.insert(name.clone()) {
            return None;
        }
        let role = SubTaskRole::parse(item.get("role")?.as_str()?)?;
        let description = item
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or(&name)
            .to_owned();
        let tools_needed = str_list(item.get("tools_needed"));
        let depends_on = str_list(item.get("depends_on"));
        tasks.push(SubTask {
            name,
            description,
            role,
            tools_needed,
            depends_on,
        });
    }

    // Dependencies on unknown names are dropped; the wave computation
    // treats the task as unblocked rather than stalling forever.
    let known: HashSet<String> = tasks.iter().map(|t| t.name.clone()).collect();
    for t in &mut tasks {
        t.depends_on.retain(|d| known.contains(d));
    }

    Some(tasks)
}

fn str_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|s| s.as_str())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn extract_json_object(content: &str) -> Option<Value> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    serde_json::from_str(&content[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn st(name: &str, deps: &[&str]) -> SubTask {
        SubTask {
            name: name.into(),
            description: format!("do {name}"),
            role: SubTaskRole::Backend,
            tools_needed: vec![],
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn waves_follow_dependencies() {
        let tasks = vec![
            st("schema", &[]),
            st("handlers", &["schema"]),
            st("tests", &["handlers"]),
        ];
        let waves = compute_waves(&tasks);
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0][0].name, "schema");
        assert_eq!(waves[1][0].name, "handlers");
        assert_eq!(waves[2][0].name, "tests");
    }

    #[test]
    fn independent_tasks_share_a_wave() {
        let tasks = vec![st("a", &[]), st("b", &[]), st("c", &["a", "b"])];
        let waves = compute_waves(&tasks);
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].len(), 2);
        assert_eq!(waves[1][0].name, "c");
    }

    #[test]
    fn cyclic_dependencies_force_one_terminal_wave() {
        let tasks = vec![st("a", &["b"]), st("b", &["a"]), st("c", &[])];
        let waves = compute_waves(&tasks);
        // c resolves; a+b are cyclic and land together in a final wave.
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0][0].name, "c");
        assert_eq!(waves[1].len(), 2);
    }

    #[test]
    fn unknown_dependencies_do_not_block() {
        let tasks = vec![st("a", &["ghost"])];
        let waves = compute_waves(&tasks);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0][0].name, "a");
    }

    #[test]
    fn decomposition_parses_and_validates() {
        let content = r#"{
            "complexity": "complex",
            "sub_tasks": [
                {"name": "schema", "description": "design it", "role": "data", "depends_on": []},
                {"name": "handlers", "description": "build it", "role": "backend", "depends_on": ["schema"]}
            ]
        }"#;
        let tasks = parse_decomposition(content, 5).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].role, SubTaskRole::Data);
        assert_eq!(tasks[1].depends_on, vec!["schema"]);
    }

    #[test]
    fn invalid_role_rejects_decomposition() {
        let content = r#"{"complexity": "complex", "sub_tasks": [
            {"name": "x", "role": "wizard", "depends_on": []}
        ]}"#;
        assert!(parse_decomposition(content, 5).is_none());
    }

    #[test]
    fn simple_verdict_parses_as_none() {
        assert!(parse_decomposition(r#"{"complexity": "simple"}"#, 5).is_none());
        assert!(parse_decomposition("not json at all", 5).is_none());
    }

    #[test]
    fn sub_task_cap_is_enforced() {
        let sub_tasks: Vec<String> = (0..20)
            .map(|i| format!(r#"{{"name": "t{i}", "role": "qa", "depends_on": []}}"#))
            .collect();
        let content = format!(
            r#"{{"complexity": "complex", "sub_tasks": [{}]}}"#,
            sub_tasks.join(",")
        );
        let tasks = parse_decomposition(&content, 5).unwrap();
        assert_eq!(tasks.len(), 5);
    }
}
