//! The signal 5-tuple — classification of one inbound message.
//!
//! A [`Signal`] is immutable once constructed. The classifier builds one
//! per inbound message; the agent loop keeps it as `current_signal` until
//! the next user message arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational action class of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Execute,
    Assist,
    Analyze,
    Build,
    Maintain,
}

/// Communicative purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    Direct,
    Inform,
    Commit,
    Decide,
    Express,
}

/// Content type of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    Question,
    Request,
    Issue,
    Scheduling,
    Summary,
    Report,
    General,
}

/// Presentation format, derived purely from the ingress channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgFormat {
    Message,
    Document,
    Notification,
    Command,
    Transcript,
}

/// High when the LLM produced the classification, low on fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// Ingress channel kind. Adapters outside the core map their transport
/// onto one of these; the core only uses it for format derivation and
/// session bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Cli,
    Http,
    Telegram,
    Discord,
    Slack,
    Whatsapp,
    Webhook,
    Filesystem,
    Other,
}

impl ChannelKind {
    /// Format is assigned purely from the channel type.
    pub fn format(self) -> MsgFormat {
        match self {
            ChannelKind::Cli => MsgFormat::Command,
            ChannelKind::Telegram
            | ChannelKind::Discord
            | ChannelKind::Slack
            | ChannelKind::Whatsapp => MsgFormat::Message,
            ChannelKind::Webhook => MsgFormat::Notification,
            ChannelKind::Filesystem => MsgFormat::Document,
            ChannelKind::Http | ChannelKind::Other => MsgFormat::Message,
        }
    }

    /// Tag used in classification cache keys and wire JSON.
    pub fn tag(self) -> &'static str {
        match self {
            ChannelKind::Cli => "cli",
            ChannelKind::Http => "http",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Discord => "discord",
            ChannelKind::Slack => "slack",
            ChannelKind::Whatsapp => "whatsapp",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Filesystem => "filesystem",
            ChannelKind::Other => "other",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The classification record produced per inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub mode: Mode,
    pub genre: Genre,
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub format: MsgFormat,
    /// Informational value in [0.0, 1.0] — the priority knob.
    pub weight: f64,
    #[serde(skip_serializing, default)]
    pub raw_text: String,
    pub channel: ChannelKind,
    pub timestamp: DateTime<Utc>,
    pub confidence: Confidence,
}

impl Signal {
    /// Fallback signal used when classification is unavailable entirely.
    pub fn fallback(text: &str, channel: ChannelKind) -> Self {
        Self {
            mode: Mode::Assist,
            genre: Genre::Inform,
            msg_type: MsgType::General,
            format: channel.format(),
            weight: 0.5,
            raw_text: text.to_owned(),
            channel,
            timestamp: Utc::now(),
            confidence: Confidence::Low,
        }
    }

    pub fn clamp_weight(w: f64) -> f64 {
        w.clamp(0.0, 1.0)
    }
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Execute,
        Mode::Assist,
        Mode::Analyze,
        Mode::Build,
        Mode::Maintain,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "execute" => Some(Mode::Execute),
            "assist" => Some(Mode::Assist),
            "analyze" => Some(Mode::Analyze),
            "build" => Some(Mode::Build),
            "maintain" => Some(Mode::Maintain),
            _ => None,
        }
    }
}

impl Genre {
    pub const ALL: [Genre; 5] = [
        Genre::Direct,
        Genre::Inform,
        Genre::Commit,
        Genre::Decide,
        Genre::Express,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Genre::Direct),
            "inform" => Some(Genre::Inform),
            "commit" => Some(Genre::Commit),
            "decide" => Some(Genre::Decide),
            "express" => Some(Genre::Express),
            _ => None,
        }
    }
}

impl MsgType {
    pub const ALL: [MsgType; 7] = [
        MsgType::Question,
        MsgType::Request,
        MsgType::Issue,
        MsgType::Scheduling,
        MsgType::Summary,
        MsgType::Report,
        MsgType::General,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "question" => Some(MsgType::Question),
            "request" => Some(MsgType::Request),
            "issue" => Some(MsgType::Issue),
            "scheduling" => Some(MsgType::Scheduling),
            "summary" => Some(MsgType::Summary),
            "report" => Some(MsgType::Report),
            "general" => Some(MsgType::General),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_format_mapping() {
        assert_eq!(ChannelKind::Cli.format(), MsgFormat::Command);
        assert_eq!(ChannelKind::Telegram.format(), MsgFormat::Message);
        assert_eq!(ChannelKind::Webhook.format(), MsgFormat::Notification);
        assert_eq!(ChannelKind::Filesystem.format(), MsgFormat::Document);
        assert_eq!(ChannelKind::Other.format(), MsgFormat::Message);
    }

    #[test]
    fn signal_wire_json_shape() {
        let sig = Signal {
            mode: Mode::Execute,
            genre: Genre::Direct,
            msg_type: MsgType::Question,
            format: MsgFormat::Message,
            weight: 0.82,
            raw_text: "secret".into(),
            channel: ChannelKind::Http,
            timestamp: Utc::now(),
            confidence: Confidence::High,
        };
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(json["mode"], "execute");
        assert_eq!(json["genre"], "direct");
        assert_eq!(json["type"], "question");
        assert_eq!(json["format"], "message");
        assert_eq!(json["channel"], "http");
        assert_eq!(json["confidence"], "high");
        // Raw text never leaves on the wire.
        assert!(json.get("raw_text").is_none());
    }

    #[test]
    fn enum_parsing_is_case_insensitive() {
        assert_eq!(Mode::parse("EXECUTE"), Some(Mode::Execute));
        assert_eq!(Genre::parse(" decide "), Some(Genre::Decide));
        assert_eq!(MsgType::parse("issue"), Some(MsgType::Issue));
        assert_eq!(Mode::parse("bogus"), None);
    }

    #[test]
    fn fallback_signal_has_low_confidence() {
        let sig = Signal::fallback("hello", ChannelKind::Cli);
        assert_eq!(sig.confidence, Confidence::Low);
        assert_eq!(sig.format, MsgFormat::Command);
        assert!((0.0..=1.0).contains(&sig.weight));
    }
}
