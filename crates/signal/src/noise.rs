//! Two-tier noise filter over classified weight.
//!
//! Instrumentation, not a gate: the agent loop logs and emits the
//! verdict but processes the message regardless.

use std::sync::OnceLock;

use regex::RegexSet;
use serde::Serialize;

use osa_domain::config::NoiseConfig;
use osa_domain::signal::Signal;

/// Why a message was classified as noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseReason {
    Empty,
    TooShort,
    Greeting,
    LowWeight,
}

/// Filter outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum NoiseVerdict {
    Signal { weight: f64 },
    Noise { reason: NoiseReason },
    Uncertain { weight: f64 },
}

impl NoiseVerdict {
    pub fn is_noise(&self) -> bool {
        matches!(self, NoiseVerdict::Noise { .. })
    }
}

fn noise_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            // Greetings and sign-offs.
            r"(?i)^\s*(hi|hey|hello|yo|sup|howdy|good\s+(morning|afternoon|evening|night)|bye|goodbye|good\s*night)\s*[!.?]*\s*$",
            // Acknowledgments.
            r"(?i)^\s*(ok(ay)?|k+|cool|nice|great|thanks?|thank\s+you|thx|ty|got\s+it|sure|yep|yes|no|nah|yeah|lol|haha+)\s*[!.?]*\s*$",
            // Emoji-only messages.
            r"^\s*[\p{Emoji_Presentation}\p{Extended_Pictographic}\s]+\s*$",
        ])
        .expect("static noise patterns")
    })
}

pub struct NoiseFilter {
    config: NoiseConfig,
}

impl NoiseFilter {
    pub fn new(config: NoiseConfig) -> Self {
        Self { config }
    }

    /// Tier 1: deterministic, sub-millisecond. Tier 2 (LLM) only applies
    /// to uncertain outcomes and is a pass-through in this build, so
    /// uncertain messages surface as-is.
    pub fn evaluate(&self, text: &str, weight: f64) -> NoiseVerdict {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return NoiseVerdict::Noise {
                reason: NoiseReason::Empty,
            };
        }
        if trimmed.chars().count() < 3 {
            return NoiseVerdict::Noise {
                reason: NoiseReason::TooShort,
            };
        }
        if noise_patterns().is_match(trimmed) {
            return NoiseVerdict::Noise {
                reason: NoiseReason::Greeting,
            };
        }
        if weight < self.config.noise_threshold {
            return NoiseVerdict::Noise {
                reason: NoiseReason::LowWeight,
            };
        }
        if weight < self.config.signal_threshold {
            return NoiseVerdict::Uncertain { weight };
        }
        NoiseVerdict::Signal { weight }
    }

    pub fn evaluate_signal(&self, signal: &Signal) -> NoiseVerdict {
        self.evaluate(&signal.raw_text, signal.weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> NoiseFilter {
        NoiseFilter::new(NoiseConfig::default())
    }

    #[test]
    fn empty_is_noise_with_empty_reason() {
        assert_eq!(
            filter().evaluate("", 0.9),
            NoiseVerdict::Noise {
                reason: NoiseReason::Empty
            }
        );
        assert_eq!(
            filter().evaluate("   ", 0.9),
            NoiseVerdict::Noise {
                reason: NoiseReason::Empty
            }
        );
    }

    #[test]
    fn under_three_chars_is_noise() {
        assert_eq!(
            filter().evaluate("hi", 0.9),
            NoiseVerdict::Noise {
                reason: NoiseReason::TooShort
            }
        );
    }

    #[test]
    fn greetings_are_noise_regardless_of_weight() {
        assert_eq!(
            filter().evaluate("hello!", 0.9),
            NoiseVerdict::Noise {
                reason: NoiseReason::Greeting
            }
        );
        assert_eq!(
            filter().evaluate("thanks", 0.9),
            NoiseVerdict::Noise {
                reason: NoiseReason::Greeting
            }
        );
    }

    #[test]
    fn weight_bands() {
        let f = filter();
        assert_eq!(
            f.evaluate("deploy the thing", 0.2),
            NoiseVerdict::Noise {
                reason: NoiseReason::LowWeight
            }
        );
        assert_eq!(
            f.evaluate("deploy the thing", 0.45),
            NoiseVerdict::Uncertain { weight: 0.45 }
        );
        assert_eq!(
            f.evaluate("deploy the thing", 0.6),
            NoiseVerdict::Signal { weight: 0.6 }
        );
    }

    #[test]
    fn real_message_is_signal() {
        let verdict = filter().evaluate("Can you review the auth middleware for races?", 0.7);
        assert_eq!(verdict, NoiseVerdict::Signal { weight: 0.7 });
    }
}
