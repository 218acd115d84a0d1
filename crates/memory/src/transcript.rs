//! Append-only JSONL session transcripts.
//!
//! Each session gets a `<session_id>.jsonl` file under the sessions
//! directory; every message is appended as a single JSON line. The one
//! sanctioned non-append operation is [`TranscriptStore::replace`],
//! which the compactor uses to swap an old prefix for a summary.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use osa_domain::error::{Error, Result};
use osa_domain::message::Message;

/// One persisted line: the message plus its wall-clock timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub timestamp: String,
    #[serde(flatten)]
    pub message: Message,
}

pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    fn path(&self, session_id: &str) -> PathBuf {
        // Session ids are UUIDs/opaque tokens; strip path separators in
        // case a caller passes something exotic.
        let safe: String = session_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
            .collect();
        self.base_dir.join(format!("{safe}.jsonl"))
    }

    /// Durable append of one message.
    pub fn append(&self, session_id: &str, message: &Message) -> Result<()> {
        let line = TranscriptLine {
            timestamp: Utc::now().to_rfc3339(),
            message: message.clone(),
        };
        let json = serde_json::to_string(&line)?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(session_id))
            .map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;
        Ok(())
    }

    /// Read back the full log. Malformed lines are skipped with a
    /// warning rather than failing the whole recall.
    pub fn recall(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut messages = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TranscriptLine>(line) {
                Ok(tl) => messages.push(tl.message),
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "skipping malformed transcript line");
                }
            }
        }
        Ok(messages)
    }

    /// Rewrite a session's log wholesale. Compactor-only.
    pub fn replace(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let mut buf = String::new();
        for message in messages {
            let line = TranscriptLine {
                timestamp: Utc::now().to_rfc3339(),
                message: message.clone(),
            };
            buf.push_str(&serde_json::to_string(&line)?);
            buf.push('\n');
        }
        std::fs::write(self.path(session_id), buf).map_err(Error::Io)?;
        Ok(())
    }

    /// List session ids that have a transcript on disk.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".jsonl") {
                ids.push(id.to_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
