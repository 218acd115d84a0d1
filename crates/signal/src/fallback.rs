//! Deterministic classification — word-boundary keyword matching for
//! mode/genre/type and a scored heuristic for weight. Runs whenever the
//! LLM path is disabled or fails, and fills any field the LLM response
//! left invalid.

use std::sync::OnceLock;

use regex::Regex;

use osa_domain::signal::{Genre, Mode, MsgType, Signal};

fn word_re(words: &[&str]) -> Regex {
    let alternation = words.join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("static keyword pattern")
}

macro_rules! keyword_set {
    ($name:ident, [$($w:literal),+ $(,)?]) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| word_re(&[$($w),+]))
        }
    };
}

keyword_set!(execute_re, ["run", "execute", "deploy", "launch", "start", "send", "trigger", "restart"]);
keyword_set!(build_re, ["build", "create", "make", "implement", "write", "add", "generate", "scaffold", "design"]);
keyword_set!(analyze_re, ["analyze", "analyse", "investigate", "compare", "evaluate", "review", "audit", "why"]);
keyword_set!(maintain_re, ["fix", "debug", "repair", "patch", "upgrade", "migrate", "refactor", "clean"]);

keyword_set!(direct_re, ["please", "now", "must", "need you", "go ahead", "do it"]);
keyword_set!(commit_re, ["i will", "i'll", "we will", "promise", "commit", "by tomorrow", "by friday"]);
keyword_set!(decide_re, ["should we", "decide", "choose", "option", "either", "versus", "vs", "or not"]);
keyword_set!(express_re, ["thanks", "thank you", "great", "awesome", "love", "hate", "sorry", "wow"]);

keyword_set!(question_re, ["who", "what", "when", "where", "why", "how", "which", "can i", "is there"]);
keyword_set!(request_re, ["please", "can you", "could you", "would you", "i need", "help me"]);
keyword_set!(issue_re, ["bug", "error", "broken", "fails", "failing", "crash", "crashes", "regression", "doesn't work"]);
keyword_set!(scheduling_re, ["schedule", "remind", "reminder", "tomorrow", "tonight", "meeting", "calendar", "at noon"]);
keyword_set!(summary_re, ["summarize", "summarise", "summary", "tldr", "recap", "digest"]);
keyword_set!(report_re, ["status", "update", "report", "progress", "standup"]);

keyword_set!(urgency_re, ["urgent", "asap", "immediately", "critical", "right now", "emergency"]);

fn greeting_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(hi|hey|hello|yo|sup|good\s+(morning|afternoon|evening)|thanks?|thank\s+you|ok(ay)?|cool|nice|got\s+it|bye|goodbye)\s*[!.?]*\s*$")
            .expect("static greeting pattern")
    })
}

pub fn classify_mode(text: &str) -> Mode {
    if maintain_re().is_match(text) {
        Mode::Maintain
    } else if build_re().is_match(text) {
        Mode::Build
    } else if execute_re().is_match(text) {
        Mode::Execute
    } else if analyze_re().is_match(text) {
        Mode::Analyze
    } else {
        Mode::Assist
    }
}

pub fn classify_genre(text: &str) -> Genre {
    if decide_re().is_match(text) {
        Genre::Decide
    } else if commit_re().is_match(text) {
        Genre::Commit
    } else if express_re().is_match(text) {
        Genre::Express
    } else if direct_re().is_match(text) {
        Genre::Direct
    } else {
        Genre::Inform
    }
}

pub fn classify_type(text: &str) -> MsgType {
    if issue_re().is_match(text) {
        MsgType::Issue
    } else if scheduling_re().is_match(text) {
        MsgType::Scheduling
    } else if summary_re().is_match(text) {
        MsgType::Summary
    } else if report_re().is_match(text) {
        MsgType::Report
    } else if text.trim_end().ends_with('?') || question_re().is_match(text) {
        MsgType::Question
    } else if request_re().is_match(text) {
        MsgType::Request
    } else {
        MsgType::General
    }
}

/// Scored heuristic weight: base + length bonus + question bonus +
/// urgency bonus − greeting penalty, clamped to [0, 1].
pub fn score_weight(text: &str) -> f64 {
    let mut weight = 0.35;

    let chars = text.chars().count();
    if chars >= 240 {
        weight += 0.20;
    } else if chars >= 80 {
        weight += 0.10;
    }

    if text.contains('?') {
        weight += 0.10;
    }
    if urgency_re().is_match(text) {
        weight += 0.20;
    }
    if is_greeting(text) {
        weight -= 0.10;
    }

    Signal::clamp_weight(weight)
}

/// Greeting/acknowledgment detection, shared with the noise filter.
pub fn is_greeting(text: &str) -> bool {
    greeting_re().is_match(text)
}
