//! Session registry, per-session run locks, and cancellation.
//!
//! One live [`SessionState`] per session id, created lazily and race-free.
//! A session's lock serializes message processing (FIFO); different
//! sessions are fully parallel. Cancellation is a per-session atomic
//! flag checked at loop checkpoints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use osa_domain::message::{Message, ToolDefinition};
use osa_domain::signal::{ChannelKind, Signal};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Thinking,
    ToolUse,
}

pub struct SessionState {
    pub session_id: String,
    pub user_id: Option<String>,
    pub channel: ChannelKind,
    /// In-memory conversation. Append-only except for compaction.
    pub messages: Vec<Message>,
    pub iteration: u32,
    pub status: SessionStatus,
    /// Snapshot of the tool descriptors available to this session.
    pub tools: Vec<ToolDefinition>,
    pub current_signal: Option<Signal>,
    pub last_active: Instant,
    /// Accumulated usage across turns (for `/usage`).
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

impl SessionState {
    fn new(session_id: &str, channel: ChannelKind, user_id: Option<String>) -> Self {
        Self {
            session_id: session_id.to_owned(),
            user_id,
            channel,
            messages: Vec::new(),
            iteration: 0,
            status: SessionStatus::Idle,
            tools: Vec::new(),
            current_signal: None,
            last_active: Instant::now(),
            total_input_tokens: 0,
            total_output_tokens: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create a session. Creation is race-free: concurrent calls
    /// for the same id yield the same instance. Returns `(state, is_new)`.
    pub fn ensure_session(
        &self,
        session_id: &str,
        channel: ChannelKind,
        user_id: Option<String>,
    ) -> (Arc<Mutex<SessionState>>, bool) {
        if let Some(existing) = self.sessions.read().get(session_id) {
            return (existing.clone(), false);
        }
        let mut sessions = self.sessions.write();
        // Re-check under the write lock — another thread may have won.
        if let Some(existing) = sessions.get(session_id) {
            return (existing.clone(), false);
        }
        let state = Arc::new(Mutex::new(SessionState::new(session_id, channel, user_id)));
        sessions.insert(session_id.to_owned(), state.clone());
        (state, true)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<SessionState>>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// The owner (user id) of a session, if the session exists.
    pub fn owner_of(&self, session_id: &str) -> Option<Option<String>> {
        self.sessions
            .read()
            .get(session_id)
            .map(|s| s.lock().user_id.clone())
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Evict sessions idle for longer than `idle_ttl` and return their
    /// ids (the caller fires `session_end` hooks). Transcripts stay on
    /// disk; the next message re-creates the session from them.
    pub fn evict_idle(&self, idle_ttl: std::time::Duration) -> Vec<String> {
        let mut sessions = self.sessions.write();
        let mut evicted = Vec::new();
        sessions.retain(|id, s| {
            if s.lock().last_active.elapsed() <= idle_ttl {
                true
            } else {
                evicted.push(id.clone());
                false
            }
        });
        evicted
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-session run locks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// At most one active `process_message` per session; waiters queue FIFO
/// on the session's semaphore.
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .expect("session semaphore never closed")
    }

    /// Drop semaphores for sessions with no holder or waiter.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A cancellation flag checked at loop checkpoints. Cloning shares the
/// underlying flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Active cancellation tokens per session, with group support for
/// cascading parent → child cancellation (the orchestrator registers its
/// workers in the task's group).
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    groups: Mutex<HashMap<String, Vec<String>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, key: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(key.to_owned(), token.clone());
        token
    }

    /// Cancel a session/task and everything in its group. Returns true
    /// if any token was found.
    pub fn cancel(&self, key: &str) -> bool {
        let mut found = false;
        {
            let tokens = self.tokens.lock();
            if let Some(token) = tokens.get(key) {
                token.cancel();
                found = true;
            }
            if let Some(children) = self.groups.lock().get(key) {
                for child in children {
                    if let Some(token) = tokens.get(child) {
                        token.cancel();
                        found = true;
                    }
                }
            }
        }
        found
    }

    pub fn remove(&self, key: &str) {
        self.tokens.lock().remove(key);
        self.groups.lock().remove(key);
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.tokens.lock().contains_key(key)
    }

    /// Whether a registered token for `key` is already cancelled. An
    /// unknown key is not cancelled.
    pub fn is_cancelled(&self, key: &str) -> bool {
        self.tokens
            .lock()
            .get(key)
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    pub fn add_to_group(&self, parent: &str, child: &str) {
        self.groups
            .lock()
            .entry(parent.to_owned())
            .or_default()
            .push(child.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_session_is_race_free_per_id() {
        let registry = Arc::new(SessionRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = registry.clone();
            handles.push(std::thread::spawn(move || {
                let (_, is_new) = r.ensure_session("s1", ChannelKind::Cli, None);
                is_new
            }));
        }
        let created: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(created, 1, "exactly one creation per id");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn eviction_respects_activity() {
        let registry = SessionRegistry::new();
        registry.ensure_session("old", ChannelKind::Cli, None);
        std::thread::sleep(std::time::Duration::from_millis(20));
        registry.ensure_session("fresh", ChannelKind::Cli, None);

        let evicted = registry.evict_idle(std::time::Duration::from_millis(10));
        assert_eq!(evicted, vec!["old".to_owned()]);
        assert!(registry.get("old").is_none());
        assert!(registry.get("fresh").is_some());
    }

    #[tokio::test]
    async fn session_lock_serializes_same_session() {
        let locks = Arc::new(SessionLockMap::new());
        let p1 = locks.acquire("s1").await;

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _p = locks2.acquire("s1").await;
            7
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(p1);
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn different_sessions_do_not_contend() {
        let locks = SessionLockMap::new();
        let _a = locks.acquire("a").await;
        let _b = locks.acquire("b").await;
    }

    #[test]
    fn cancel_cascades_through_group() {
        let map = CancelMap::new();
        let parent = map.register("task:1");
        let child = map.register("task:1:schema");
        map.add_to_group("task:1", "task:1:schema");

        assert!(map.cancel("task:1"));
        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancel_unknown_key_is_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }
}
