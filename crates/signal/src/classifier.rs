//! The signal classifier — LLM-primary with deterministic fallback and
//! cached results. `classify` never fails; any internal error degrades
//! to the fallback path with `confidence = low`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use osa_domain::config::{ClassifierConfig, ModelTier};
use osa_domain::message::Message;
use osa_domain::signal::{ChannelKind, Confidence, Signal};
use osa_providers::{ChatRequest, ProviderRegistry};

use crate::cache::ClassifierCache;
use crate::fallback;

/// Messages are truncated to this many characters before the LLM sees
/// them; classification does not need the tail of a long document.
const MAX_CLASSIFY_CHARS: usize = 1000;

const CLASSIFY_MAX_TOKENS: u32 = 200;

pub struct SignalClassifier {
    config: ClassifierConfig,
    providers: Arc<ProviderRegistry>,
    cache: ClassifierCache,
}

impl SignalClassifier {
    pub fn new(config: ClassifierConfig, providers: Arc<ProviderRegistry>) -> Self {
        let cache = ClassifierCache::new(config.cache_ttl_s);
        Self {
            config,
            providers,
            cache,
        }
    }

    /// Classify one inbound message. Cache → LLM → deterministic
    /// fallback; format always derives from the channel.
    pub async fn classify(&self, text: &str, channel: ChannelKind) -> Signal {
        let key = ClassifierCache::key(channel, text);
        if let Some(signal) = self.cache.get(&key) {
            tracing::debug!(channel = %channel, "classification cache hit");
            return signal;
        }

        if self.config.llm_enabled && !self.providers.is_empty() {
            match self.classify_llm(text, channel).await {
                Ok(signal) => {
                    self.cache.insert(key, signal.clone());
                    return signal;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "LLM classification failed, using fallback");
                }
            }
        }

        self.classify_fallback(text, channel)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Deterministic path. Never inserted into the cache.
    fn classify_fallback(&self, text: &str, channel: ChannelKind) -> Signal {
        Signal {
            mode: fallback::classify_mode(text),
            genre: fallback::classify_genre(text),
            msg_type: fallback::classify_type(text),
            format: channel.format(),
            weight: fallback::score_weight(text),
            raw_text: text.to_owned(),
            channel,
            timestamp: Utc::now(),
            confidence: Confidence::Low,
        }
    }

    async fn classify_llm(
        &self,
        text: &str,
        channel: ChannelKind,
    ) -> osa_domain::Result<Signal> {
        let prompt = render_prompt(text);
        let req = ChatRequest {
            messages: vec![Message::user(prompt)],
            temperature: Some(0.0),
            max_tokens: Some(CLASSIFY_MAX_TOKENS),
            ..Default::default()
        };
        let resp = self.providers.chat_tier(ModelTier::Utility, req).await?;

        let parsed = parse_classification(&resp.content).ok_or_else(|| {
            osa_domain::Error::Other("classification response is not a JSON object".into())
        })?;

        // Any missing or invalid field falls back to the deterministic
        // classification of the same text.
        Ok(Signal {
            mode: parsed
                .get("mode")
                .and_then(|v| v.as_str())
                .and_then(osa_domain::Mode::parse)
                .unwrap_or_else(|| fallback::classify_mode(text)),
            genre: parsed
                .get("genre")
                .and_then(|v| v.as_str())
                .and_then(osa_domain::Genre::parse)
                .unwrap_or_else(|| fallback::classify_genre(text)),
            msg_type: parsed
                .get("type")
                .and_then(|v| v.as_str())
                .and_then(osa_domain::MsgType::parse)
                .unwrap_or_else(|| fallback::classify_type(text)),
            format: channel.format(),
            weight: parsed
                .get("weight")
                .and_then(|v| v.as_f64())
                .map(Signal::clamp_weight)
                .unwrap_or_else(|| fallback::score_weight(text)),
            raw_text: text.to_owned(),
            channel,
            timestamp: Utc::now(),
            confidence: Confidence::High,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt & parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Truncate to the char budget and neutralize quotes/newlines so the
/// message cannot break out of the prompt template.
fn sanitize_for_prompt(text: &str) -> String {
    let truncated: String = text.chars().take(MAX_CLASSIFY_CHARS).collect();
    truncated
        .replace('\\', "\\\\")
        .replace('"', "'")
        .replace('\n', " ")
        .replace('\r', " ")
}

fn render_prompt(text: &str) -> String {
    format!(
        "Classify the following message along four dimensions. Respond with \
         ONLY a JSON object, no prose.\n\n\
         Dimensions:\n\
         - mode: one of execute, assist, analyze, build, maintain\n\
         - genre: one of direct, inform, commit, decide, express\n\
         - type: one of question, request, issue, scheduling, summary, report, general\n\
         - weight: informational value from 0.0 (noise) to 1.0 (critical)\n\n\
         Message: \"{}\"\n\n\
         JSON:",
        sanitize_for_prompt(text)
    )
}

/// Parse the model's reply. Accepts a clean JSON object or extracts the
/// first balanced brace pair from surrounding prose.
fn parse_classification(content: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(content.trim()) {
        if v.is_object() {
            return Some(v);
        }
    }
    let (start, end) = first_balanced_braces(content)?;
    serde_json::from_str::<Value>(&content[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

fn first_balanced_braces(s: &str) -> Option<(usize, usize)> {
    let bytes = s.as_bytes();
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, i));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use osa_domain::signal::{Genre, Mode, MsgFormat, MsgType};
    use osa_providers::{ScriptedProvider, Step};

    fn classifier_with(steps: Vec<Step>, llm_enabled: bool) -> SignalClassifier {
        let registry = Arc::new(ProviderRegistry::single(
            "scripted",
            Arc::new(ScriptedProvider::new(steps)),
        ));
        SignalClassifier::new(
            ClassifierConfig {
                llm_enabled,
                cache_ttl_s: 600,
            },
            registry,
        )
    }

    #[tokio::test]
    async fn llm_classification_parses_json() {
        let c = classifier_with(
            vec![Step::text(
                r#"{"mode": "build", "genre": "direct", "type": "request", "weight": 0.8}"#,
            )],
            true,
        );
        let sig = c.classify("build me an API", ChannelKind::Http).await;
        assert_eq!(sig.mode, Mode::Build);
        assert_eq!(sig.genre, Genre::Direct);
        assert_eq!(sig.msg_type, MsgType::Request);
        assert_eq!(sig.weight, 0.8);
        assert_eq!(sig.confidence, Confidence::High);
        assert_eq!(sig.format, MsgFormat::Message);
    }

    #[tokio::test]
    async fn json_embedded_in_prose_is_extracted() {
        let c = classifier_with(
            vec![Step::text(
                r#"Sure! Here's the classification: {"mode": "execute", "genre": "direct", "type": "request", "weight": 0.9} hope that helps"#,
            )],
            true,
        );
        let sig = c.classify("deploy now", ChannelKind::Cli).await;
        assert_eq!(sig.mode, Mode::Execute);
        assert_eq!(sig.weight, 0.9);
    }

    #[tokio::test]
    async fn invalid_fields_fill_from_fallback() {
        let c = classifier_with(
            vec![Step::text(r#"{"mode": "turbo", "weight": 7.5}"#)],
            true,
        );
        let sig = c.classify("fix the crash please", ChannelKind::Cli).await;
        // "turbo" is not a mode → fallback keyword match wins.
        assert_eq!(sig.mode, Mode::Maintain);
        // 7.5 clamps rather than falls back.
        assert_eq!(sig.weight, 1.0);
        assert_eq!(sig.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_fallback() {
        let c = classifier_with(vec![Step::overflow()], true);
        let sig = c.classify("what's the weather?", ChannelKind::Cli).await;
        assert_eq!(sig.confidence, Confidence::Low);
        assert_eq!(sig.msg_type, MsgType::Question);
    }

    #[tokio::test]
    async fn successful_classification_is_cached() {
        let c = classifier_with(
            vec![Step::text(
                r#"{"mode": "assist", "genre": "inform", "type": "question", "weight": 0.5}"#,
            )],
            true,
        );
        let first = c.classify("same question", ChannelKind::Cli).await;
        // Second call would exhaust the script if it hit the provider.
        let second = c.classify("same question", ChannelKind::Cli).await;
        assert_eq!(c.cache_len(), 1);
        assert_eq!(first.mode, second.mode);
        assert_eq!(first.weight, second.weight);
        assert!(second.timestamp >= first.timestamp);
    }

    #[tokio::test]
    async fn fallback_results_are_not_cached() {
        let c = classifier_with(vec![], false);
        c.classify("hello there", ChannelKind::Cli).await;
        assert_eq!(c.cache_len(), 0);
    }

    #[tokio::test]
    async fn exactly_1000_chars_classifies_without_truncation() {
        let text = "a".repeat(1000);
        let c = classifier_with(vec![], false);
        let sig = c.classify(&text, ChannelKind::Cli).await;
        assert_eq!(sig.raw_text.chars().count(), 1000);
        assert!((0.0..=1.0).contains(&sig.weight));
    }

    #[test]
    fn sanitize_neutralizes_quotes_and_newlines() {
        let out = sanitize_for_prompt("line1\nline2 \"quoted\"");
        assert!(!out.contains('\n'));
        assert!(!out.contains('"'));
    }
}
