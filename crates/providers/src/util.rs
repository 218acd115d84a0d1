use osa_domain::config::ProviderConfig;

/// Resolve the API key for a provider: env var first, then the inline
/// config value.
pub fn resolve_api_key(cfg: &ProviderConfig) -> Option<String> {
    if let Some(ref env_name) = cfg.api_key_env {
        if let Ok(v) = std::env::var(env_name) {
            if !v.is_empty() {
                return Some(v);
            }
        }
    }
    cfg.api_key.clone().filter(|k| !k.is_empty())
}

/// Heuristic over error bodies: does this look like a context-window
/// violation? Vendors phrase it differently; all mention the context or
/// token limit.
pub fn is_context_overflow_text(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("context length")
        || lower.contains("context window")
        || lower.contains("maximum context")
        || lower.contains("too many tokens")
        || lower.contains("prompt is too long")
}

/// Truncate to at most `max` bytes on a char boundary.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message so raw secrets never reach logs or health endpoints.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_owned();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_detection_matches_vendor_phrasings() {
        assert!(is_context_overflow_text("This model's maximum context length is 8192 tokens"));
        assert!(is_context_overflow_text("prompt is too long: 210000 tokens"));
        assert!(!is_context_overflow_text("invalid api key"));
    }

    #[test]
    fn mask_hides_key_like_tokens() {
        let masked = mask_secrets("auth failed for key sk_abcdefghijklmnopqrstuvwxyz123");
        assert!(!masked.contains("sk_abcdefghijklmnopqrstuvwxyz123"));
        assert!(masked.contains("..."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld, this is a long string";
        let t = truncate(s, 10);
        assert!(t.len() <= 14); // 10 bytes + ellipsis
        assert!(t.ends_with('…'));
    }
}
