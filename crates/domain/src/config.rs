use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Application configuration, loaded from `<state_dir>/config.json`.
/// Every field has a serde default so a missing or empty file yields a
/// fully usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Root for persisted state (sessions/, memory.md, skills/). Defaults
    /// to `~/.osa` at load time when unset.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Config {
    /// Load from `<dir>/config.json`. A missing file yields defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("config.json");
        if !path.exists() {
            let mut cfg = Config::default();
            cfg.state_dir = Some(dir.to_path_buf());
            return Ok(cfg);
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut cfg: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        if cfg.state_dir.is_none() {
            cfg.state_dir = Some(dir.to_path_buf());
        }
        Ok(cfg)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| PathBuf::from(".osa"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_bind")]
    pub bind: String,
    /// When true, all API routes require `Authorization: Bearer <token>`.
    #[serde(default)]
    pub require_auth: bool,
    /// Env var holding the bearer token, read once at startup.
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: d_bind(),
            require_auth: false,
            api_token_env: d_token_env(),
        }
    }
}

fn d_bind() -> String {
    "127.0.0.1:8780".to_owned()
}
fn d_token_env() -> String {
    "OSA_API_TOKEN".to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers & tiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Model-class routing key. Callers request a tier; the registry resolves
/// the concrete model for the selected provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Elite,
    Specialist,
    Utility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
    /// In-process scripted provider, used by tests and offline demos.
    Scripted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Env var to read the API key from (preferred over `api_key`).
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Provider id used when a caller does not name one.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// `(tier, provider_id) → model_name`.
    #[serde(default)]
    pub tiers: HashMap<ModelTier, HashMap<String, String>>,
    /// Per-call timeout for provider HTTP requests.
    #[serde(default = "d_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            default_provider: None,
            tiers: HashMap::new(),
            provider_timeout_ms: d_provider_timeout_ms(),
        }
    }
}

fn d_provider_timeout_ms() -> u64 {
    120_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifier & noise filter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// When false (or no provider is reachable) only the deterministic
    /// fallback runs.
    #[serde(default = "d_true")]
    pub llm_enabled: bool,
    #[serde(default = "d_cache_ttl_s")]
    pub cache_ttl_s: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            llm_enabled: true,
            cache_ttl_s: d_cache_ttl_s(),
        }
    }
}

fn d_cache_ttl_s() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Weight below this is noise.
    #[serde(default = "d_noise_floor")]
    pub noise_threshold: f64,
    /// Weight at or above this is signal; between the two is uncertain.
    #[serde(default = "d_signal_floor")]
    pub signal_threshold: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            noise_threshold: d_noise_floor(),
            signal_threshold: d_signal_floor(),
        }
    }
}

fn d_noise_floor() -> f64 {
    0.3
}
fn d_signal_floor() -> f64 {
    0.6
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context assembler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "d_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Tokens reserved for the model's response.
    #[serde(default = "d_response_reserve")]
    pub response_reserve: usize,
    /// Tier 2 cap as a fraction of the system budget.
    #[serde(default = "d_tier2_pct")]
    pub tier2_budget_pct: f64,
    /// Tier 3 cap as a fraction of the system budget.
    #[serde(default = "d_tier3_pct")]
    pub tier3_budget_pct: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: d_max_context_tokens(),
            response_reserve: d_response_reserve(),
            tier2_budget_pct: d_tier2_pct(),
            tier3_budget_pct: d_tier3_pct(),
        }
    }
}

fn d_max_context_tokens() -> usize {
    32_000
}
fn d_response_reserve() -> usize {
    2_000
}
fn d_tier2_pct() -> f64 {
    0.40
}
fn d_tier3_pct() -> f64 {
    0.30
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider calls allowed per top-level user message.
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
            temperature: d_temperature(),
        }
    }
}

fn d_max_iterations() -> u32 {
    30
}
fn d_temperature() -> f32 {
    0.2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thresholds are fractions of the conversation token budget
/// (`max_context_tokens − response_reserve`, system prefix excluded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "d_warm")]
    pub warm_threshold: f64,
    #[serde(default = "d_pressure")]
    pub pressure_threshold: f64,
    #[serde(default = "d_soft")]
    pub soft_threshold: f64,
    #[serde(default = "d_hard")]
    pub hard_threshold: f64,
    /// Fraction of oldest messages replaced on a soft compaction.
    #[serde(default = "d_soft_drop")]
    pub soft_drop_fraction: f64,
    /// Fraction of oldest messages replaced on a hard compaction.
    #[serde(default = "d_hard_drop")]
    pub hard_drop_fraction: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            warm_threshold: d_warm(),
            pressure_threshold: d_pressure(),
            soft_threshold: d_soft(),
            hard_threshold: d_hard(),
            soft_drop_fraction: d_soft_drop(),
            hard_drop_fraction: d_hard_drop(),
        }
    }
}

fn d_warm() -> f64 {
    0.50
}
fn d_pressure() -> f64 {
    0.70
}
fn d_soft() -> f64 {
    0.85
}
fn d_hard() -> f64 {
    0.95
}
fn d_soft_drop() -> f64 {
    0.50
}
fn d_hard_drop() -> f64 {
    0.70
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Sub-task count cap per decomposition. Hard upper bound of 10.
    #[serde(default = "d_max_agents")]
    pub max_agents: usize,
    #[serde(default = "d_orchestrator_timeout_ms")]
    pub timeout_ms: u64,
    /// Run the cost/hours appraisal step before the first wave.
    #[serde(default = "d_true")]
    pub appraisal_enabled: bool,
    /// Completed tasks are retained for progress queries this long.
    #[serde(default = "d_retention_s")]
    pub retention_s: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents: d_max_agents(),
            timeout_ms: d_orchestrator_timeout_ms(),
            appraisal_enabled: true,
            retention_s: d_retention_s(),
        }
    }
}

impl OrchestratorConfig {
    pub fn effective_max_agents(&self) -> usize {
        self.max_agents.clamp(1, 10)
    }
}

fn d_max_agents() -> usize {
    5
}
fn d_orchestrator_timeout_ms() -> u64 {
    300_000
}
fn d_retention_s() -> u64 {
    3_600
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hooks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Signals at or above this weight (in build/execute/maintain modes)
    /// are routed through plan mode first.
    #[serde(default = "d_plan_threshold")]
    pub plan_weight_threshold: f64,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            plan_weight_threshold: d_plan_threshold(),
        }
    }
}

fn d_plan_threshold() -> f64 {
    0.75
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Idle sessions are evicted from memory after this many seconds.
    /// Transcripts stay on disk; the next message re-creates the session.
    #[serde(default = "d_idle_eviction_s")]
    pub idle_eviction_s: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_eviction_s: d_idle_eviction_s(),
        }
    }
}

fn d_idle_eviction_s() -> u64 {
    3_600
}

fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.agent.max_iterations, 30);
        assert_eq!(cfg.classifier.cache_ttl_s, 600);
        assert_eq!(cfg.context.tier2_budget_pct, 0.40);
        assert_eq!(cfg.context.tier3_budget_pct, 0.30);
        assert_eq!(cfg.orchestrator.max_agents, 5);
        assert_eq!(cfg.llm.provider_timeout_ms, 120_000);
        assert!(!cfg.server.require_auth);
    }

    #[test]
    fn max_agents_is_clamped() {
        let cfg = OrchestratorConfig {
            max_agents: 50,
            ..Default::default()
        };
        assert_eq!(cfg.effective_max_agents(), 10);
        let cfg = OrchestratorConfig {
            max_agents: 0,
            ..Default::default()
        };
        assert_eq!(cfg.effective_max_agents(), 1);
    }

    #[test]
    fn tier_map_round_trips() {
        let raw = serde_json::json!({
            "llm": {
                "default_provider": "local",
                "providers": [
                    {"id": "local", "kind": "openai_compat", "base_url": "http://localhost:1234/v1"}
                ],
                "tiers": {
                    "elite": {"local": "big-model"},
                    "utility": {"local": "small-model"}
                }
            }
        });
        let cfg: Config = serde_json::from_value(raw).unwrap();
        assert_eq!(
            cfg.llm.tiers[&ModelTier::Elite]["local"],
            "big-model"
        );
        assert_eq!(cfg.llm.providers[0].kind, ProviderKind::OpenaiCompat);
    }
}
