//! Classification cache.
//!
//! Entries are keyed by `SHA256(channel_tag || ":" || raw_text)` and
//! expire after the configured TTL. Only successful LLM classifications
//! are inserted — fallback results are recomputed on every call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use osa_domain::signal::{ChannelKind, Signal};

/// Entries beyond this trigger an eviction sweep on insert.
const MAX_ENTRIES: usize = 10_000;

struct Entry {
    signal: Signal,
    inserted_at: Instant,
}

pub struct ClassifierCache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl ClassifierCache {
    pub fn new(ttl_s: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_s),
        }
    }

    pub fn key(channel: ChannelKind, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(channel.tag().as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up a live entry. The returned signal carries a refreshed
    /// timestamp; mode/genre/type/weight/format are the stored values.
    pub fn get(&self, key: &str) -> Option<Signal> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        let mut signal = entry.signal.clone();
        signal.timestamp = chrono::Utc::now();
        Some(signal)
    }

    pub fn insert(&self, key: String, signal: Signal) {
        let mut entries = self.entries.write();
        if entries.len() >= MAX_ENTRIES {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
        }
        entries.insert(
            key,
            Entry {
                signal,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osa_domain::signal::ChannelKind;

    #[test]
    fn key_depends_on_channel_and_text() {
        let a = ClassifierCache::key(ChannelKind::Cli, "hello");
        let b = ClassifierCache::key(ChannelKind::Http, "hello");
        let c = ClassifierCache::key(ChannelKind::Cli, "hello!");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, ClassifierCache::key(ChannelKind::Cli, "hello"));
    }

    #[test]
    fn hit_refreshes_timestamp_but_not_classification() {
        let cache = ClassifierCache::new(600);
        let sig = Signal::fallback("hello", ChannelKind::Cli);
        let key = ClassifierCache::key(ChannelKind::Cli, "hello");
        cache.insert(key.clone(), sig.clone());

        let got = cache.get(&key).unwrap();
        assert_eq!(got.mode, sig.mode);
        assert_eq!(got.weight, sig.weight);
        assert!(got.timestamp >= sig.timestamp);
    }

    #[test]
    fn expired_entries_miss() {
        let cache = ClassifierCache::new(0);
        let key = ClassifierCache::key(ChannelKind::Cli, "x");
        cache.insert(key.clone(), Signal::fallback("x", ChannelKind::Cli));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
    }
}
