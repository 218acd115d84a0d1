//! Tool-call normalization for providers that embed a tool call in
//! free-form content instead of the structured field.
//!
//! One best-effort extraction attempt: find the first balanced brace
//! pair, parse it, and accept it only if it names a tool and carries an
//! arguments object.

use serde_json::Value;

use osa_domain::message::ToolCall;

/// Scan content for one embedded tool call. Returns the call and the
/// content with the JSON blob removed, or `None` when nothing usable is
/// found.
pub fn extract_embedded_tool_call(content: &str) -> Option<(ToolCall, String)> {
    let (start, end) = first_balanced_braces(content)?;
    let candidate = &content[start..=end];
    let parsed: Value = serde_json::from_str(candidate).ok()?;

    let name = parsed.get("name")?.as_str()?.to_owned();
    let arguments = parsed
        .get("arguments")
        .or_else(|| parsed.get("args"))
        .or_else(|| parsed.get("input"))
        .cloned()?;
    if !arguments.is_object() {
        return None;
    }

    let remainder = format!("{}{}", &content[..start], &content[end + 1..])
        .trim()
        .to_owned();

    Some((
        ToolCall {
            id: format!("embedded_{:x}", content.len() ^ (start << 8)),
            name,
            arguments,
        },
        remainder,
    ))
}

/// Byte range of the first balanced `{...}` pair, string-literal aware.
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

    #[test]
    fn extracts_call_from_surrounding_prose() {
        let content = r#"I'll run it: {"name": "echo", "arguments": {"text": "abc"}} done."#;
        let (call, rest) = extract_embedded_tool_call(content).unwrap();
        assert_eq!(call.name, "echo");
        assert_eq!(call.arguments["text"], "abc");
        assert_eq!(rest, "I'll run it:  done.");
    }

    #[test]
    fn ignores_plain_json_without_tool_shape() {
        assert!(extract_embedded_tool_call(r#"data: {"x": 1}"#).is_none());
    }

    #[test]
    fn ignores_non_object_arguments() {
        assert!(extract_embedded_tool_call(r#"{"name": "t", "arguments": "str"}"#).is_none());
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let content = r#"{"name": "echo", "arguments": {"text": "curly } brace"}}"#;
        let (call, _) = extract_embedded_tool_call(content).unwrap();
        assert_eq!(call.arguments["text"], "curly } brace");
    }

    #[test]
    fn no_braces_means_none() {
        assert!(extract_embedded_tool_call("plain text answer").is_none());
    }
}
