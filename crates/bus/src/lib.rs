//! In-process event bus — topic-routed pub/sub backing SSE streams,
//! channel adapters, and the progress tracker.
//!
//! Publishers call [`EventBus::emit`]; subscribers register a handler per
//! topic in sync or async mode. Sync handlers run inline on the
//! publisher's execution context (their latency is charged to the
//! publisher — lightweight fan-out only). Async handlers are queued to a
//! bounded worker pool; ordering among async handlers for one event is
//! unspecified.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

pub mod topics {
    //! Mandatory topics. Topics are opaque tokens; these are the ones the
    //! core emits on.
    pub const AGENT_RESPONSE: &str = "agent_response";
    pub const TOOL_CALL: &str = "tool_call";
    pub const LLM_REQUEST: &str = "llm_request";
    pub const LLM_RESPONSE: &str = "llm_response";
    /// Firehose: every orchestrator, swarm, and context-pressure event,
    /// shaped `{event: <tag>, ...fields}`.
    pub const SYSTEM_EVENT: &str = "system_event";
}

/// How a handler is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    /// Inline on the publisher's thread.
    Sync,
    /// Queued to the shared worker pool.
    Async,
}

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Opaque reference returned by [`EventBus::subscribe`], usable in
/// [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: u64,
    mode: HandlerMode,
    handler: Handler,
}

struct AsyncJob {
    topic: String,
    handler: Handler,
    payload: Value,
}

/// The process-wide bus. Cheap to clone (all state behind `Arc`).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscribers: RwLock<std::collections::HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    async_tx: mpsc::Sender<AsyncJob>,
}

impl EventBus {
    /// Create the bus and spawn its async dispatch loop.
    ///
    /// `workers` bounds concurrent async handler executions; `queue`
    /// bounds pending jobs. When the queue is full new async jobs are
    /// dropped with a warning (at-most-once, never backpressure the
    /// publisher).
    pub fn new(workers: usize, queue: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AsyncJob>(queue.max(1));
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        (job.handler)(&job.payload)
                    }));
                    if result.is_err() {
                        tracing::error!(topic = %job.topic, "async event handler panicked");
                    }
                    drop(permit);
                });
            }
        });

        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(std::collections::HashMap::new()),
                next_id: AtomicU64::new(1),
                async_tx: tx,
            }),
        }
    }

    /// Register a handler. Returns an id for [`Self::unsubscribe`].
    pub fn subscribe(
        &self,
        topic: &str,
        mode: HandlerMode,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .entry(topic.to_owned())
            .or_default()
            .push(Subscriber {
                id,
                mode,
                handler: Arc::new(handler),
            });
        SubscriptionId(id)
    }

    /// Remove a handler. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.inner.subscribers.write();
        for list in subs.values_mut() {
            list.retain(|s| s.id != id.0);
        }
    }

    /// Publish a payload to a topic. No subscribers → no-op. Handler
    /// return values are ignored; a panicking sync handler is caught and
    /// logged so other subscribers still run.
    pub fn emit(&self, topic: &str, payload: Value) {
        // Snapshot under the read lock, invoke outside it — a handler
        // that re-enters the bus must not deadlock.
        let snapshot: Vec<(HandlerMode, Handler)> = {
            let subs = self.inner.subscribers.read();
            match subs.get(topic) {
                Some(list) => list
                    .iter()
                    .map(|s| (s.mode, s.handler.clone()))
                    .collect(),
                None => return,
            }
        };

        for (mode, handler) in snapshot {
            match mode {
                HandlerMode::Sync => {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        handler(&payload)
                    }));
                    if result.is_err() {
                        tracing::error!(topic, "sync event handler panicked");
                    }
                }
                HandlerMode::Async => {
                    let job = AsyncJob {
                        topic: topic.to_owned(),
                        handler,
                        payload: payload.clone(),
                    };
                    if let Err(e) = self.inner.async_tx.try_send(job) {
                        tracing::warn!(topic, error = %e, "async event queue full, dropping event");
                    }
                }
            }
        }
    }

    /// Emit on the `system_event` firehose: `{event: <tag>, ...fields}`.
    pub fn emit_system(&self, tag: &str, fields: Value) {
        let mut payload = match fields {
            Value::Object(map) => Value::Object(map),
            other => serde_json::json!({ "data": other }),
        };
        if let Value::Object(ref mut map) = payload {
            map.insert("event".to_owned(), Value::String(tag.to_owned()));
        }
        self.emit(topics::SYSTEM_EVENT, payload);
    }

    /// Subscriber count for a topic (monitoring / tests).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .get(topic)
            .map_or(0, |l| l.len())
    }
}
