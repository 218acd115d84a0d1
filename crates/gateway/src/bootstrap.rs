//! Runtime wiring: config load, provider construction, background
//! maintenance tasks.

use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use osa_domain::config::Config;
use osa_providers::ProviderRegistry;
use osa_runtime::{AgentRuntime, Orchestrator, ProgressTracker};

use crate::state::AppState;

/// Default state directory: `~/.osa`.
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".osa")
}

pub fn load_config(state_dir: Option<PathBuf>) -> anyhow::Result<Config> {
    let dir = state_dir.unwrap_or_else(default_state_dir);
    Ok(Config::load(&dir)?)
}

/// Build the full application state. Must run inside a tokio runtime.
pub fn build_app_state(config: Config) -> anyhow::Result<AppState> {
    let api_token_hash = if config.server.require_auth {
        match std::env::var(&config.server.api_token_env) {
            Ok(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
            _ => {
                anyhow::bail!(
                    "require_auth is set but {} is empty",
                    config.server.api_token_env
                );
            }
        }
    } else {
        None
    };

    let providers = ProviderRegistry::from_config(&config.llm);
    if providers.is_empty() {
        tracing::warn!(
            "no LLM providers initialized; classification falls back to \
             keywords and chat endpoints will fail until one is configured"
        );
    }

    let rt = AgentRuntime::bootstrap(config, providers)?;
    let progress = ProgressTracker::attach(&rt.bus);
    let orchestrator = Arc::new(Orchestrator::new(rt.clone()));

    Ok(AppState {
        rt,
        orchestrator,
        progress,
        api_token_hash,
    })
}

/// Periodic maintenance: idle-session eviction, terminal-task eviction,
/// lock pruning.
pub fn spawn_background_tasks(state: &AppState) {
    let rt = state.rt.clone();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let idle_ttl = std::time::Duration::from_secs(rt.config.sessions.idle_eviction_s);
            let evicted = rt.sessions.evict_idle(idle_ttl);
            for session_id in &evicted {
                rt.hooks.run_post(
                    osa_hooks::HookEvent::SessionEnd,
                    serde_json::json!({ "session_id": session_id }),
                );
            }
            if !evicted.is_empty() {
                tracing::debug!(count = evicted.len(), "evicted idle sessions");
            }
            rt.locks.prune_idle();
            let retention = std::time::Duration::from_secs(rt.config.orchestrator.retention_s);
            orchestrator.evict_terminal(retention);
        }
    });
}
