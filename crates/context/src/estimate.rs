//! Token estimation heuristic: words × 1.3 + punctuation × 0.5.
//!
//! The same estimator builds the budget and performs truncation, so the
//! assembler's accounting is internally consistent even without a real
//! tokenizer.

use osa_domain::message::Message;

/// Fixed per-message overhead (role tag, separators).
const MESSAGE_OVERHEAD: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punct = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    (words as f64 * 1.3 + punct as f64 * 0.5).ceil() as usize
}

pub fn estimate_tokens_messages(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| {
            let mut t = estimate_tokens(m.text()) + MESSAGE_OVERHEAD;
            for tc in &m.tool_calls {
                t += estimate_tokens(&tc.arguments.to_string()) + MESSAGE_OVERHEAD;
            }
            t
        })
        .sum()
}

/// Truncate `text` to roughly `budget` tokens on a word boundary,
/// appending the explicit truncation marker. Returns `(text, truncated)`.
pub fn truncate_to_tokens(text: &str, budget: usize) -> (String, bool) {
    if estimate_tokens(text) <= budget {
        return (text.to_owned(), false);
    }

    let mut out = String::new();
    let mut spent = 0usize;
    for word in text.split_whitespace() {
        let cost = estimate_tokens(word).max(1);
        if spent + cost > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        spent += cost;
    }
    out.push_str("\n[...truncated...]");
    (out, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn words_dominate_the_estimate() {
        let five = estimate_tokens("one two three four five");
        assert!((6..=8).contains(&five), "got {five}");
    }

    #[test]
    fn punctuation_adds_cost() {
        assert!(estimate_tokens("a, b, c!") > estimate_tokens("a b c"));
    }

    #[test]
    fn messages_include_overhead_and_tool_calls() {
        let plain = vec![Message::user("hello world")];
        let base = estimate_tokens_messages(&plain);
        assert!(base > estimate_tokens("hello world"));

        let with_tc = vec![Message::assistant_tool_calls(
            None,
            vec![osa_domain::message::ToolCall {
                id: "c".into(),
                name: "t".into(),
                arguments: serde_json::json!({"key": "some value here"}),
            }],
        )];
        assert!(estimate_tokens_messages(&with_tc) > MESSAGE_OVERHEAD);
    }

    #[test]
    fn truncation_fits_budget_and_marks() {
        let text = "word ".repeat(500);
        let (out, truncated) = truncate_to_tokens(&text, 50);
        assert!(truncated);
        assert!(out.ends_with("[...truncated...]"));
        // Marker cost aside, the body respects the budget.
        let body = out.trim_end_matches("\n[...truncated...]");
        assert!(estimate_tokens(body) <= 50);
    }

    #[test]
    fn short_text_is_untouched() {
        let (out, truncated) = truncate_to_tokens("short", 100);
        assert_eq!(out, "short");
        assert!(!truncated);
    }
}
