use std::sync::Arc;

use osa_runtime::{AgentRuntime, Orchestrator, ProgressTracker};

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub rt: Arc<AgentRuntime>,
    pub orchestrator: Arc<Orchestrator>,
    pub progress: Arc<ProgressTracker>,
    /// SHA-256 of the API bearer token, read once at startup.
    /// `None` = auth not required (dev mode / anonymous).
    pub api_token_hash: Option<Vec<u8>>,
}

impl AppState {
    pub fn require_auth(&self) -> bool {
        self.api_token_hash.is_some()
    }
}
