//! Pull structured JSON out of free-form model replies
//!
//! Models wrap JSON in prose or markdown fences, and the prose may itself
//! contain stray brackets. Every balanced span is tried in order until one
//! parses.

use serde::de::DeserializeOwned;

/// Balanced `open ... close` span starting at the head of `text`, skipping
/// brackets inside strings
fn balanced_prefix(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            _ if c == open => depth += 1,
            _ if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// One candidate span per opening bracket that closes, in reply order
fn balanced_spans(raw: &str, open: char, close: char) -> impl Iterator<Item = &str> {
    raw.match_indices(open)
        .filter_map(move |(start, _)| balanced_prefix(&raw[start..], open, close))
}

fn parse_first<T: DeserializeOwned>(raw: &str, open: char, close: char, what: &str) -> Result<T, String> {
    let mut first_error = None;

    for span in balanced_spans(raw.trim(), open, close) {
        match serde_json::from_str(span) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert_with(|| format!("invalid JSON {}: {}", what, e));
            }
        }
    }

    Err(first_error.unwrap_or_else(|| format!("no JSON {} in reply", what)))
}

/// Parse the first JSON object in the reply that fits `T`
pub fn parse_object<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    parse_first(raw, '{', '}', "object")
}

/// Parse the first JSON array in the reply that fits `Vec<T>`
pub fn parse_array<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, String> {
    parse_first(raw, '[', ']', "array")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Verdict {
        score: f64,
        reason: String,
    }

    #[test]
    fn test_object_inside_fence() {
        let raw = "Sure!\n```json\n{\"score\": 1.0, \"reason\": \"A is {better}\"}\n```";
        let verdict: Verdict = parse_object(raw).unwrap();
        assert_eq!(verdict.score, 1.0);
        assert_eq!(verdict.reason, "A is {better}");
    }

    #[test]
    fn test_array_with_nested_objects() {
        let raw = "Here you go: [{\"query\": \"a]b\"}, {\"query\": \"c\"}] done";
        let parsed: Vec<serde_json::Value> = parse_array(raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["query"], "a]b");
    }

    #[test]
    fn test_unbalanced_reply() {
        let err = parse_object::<serde_json::Value>("{\"score\": 1.0").unwrap_err();
        assert_eq!(err, "no JSON object in reply");
        assert!(parse_object::<serde_json::Value>("no json here").is_err());
    }

    #[test]
    fn test_escaped_quote_in_string() {
        let raw = r#"{"reason": "she said \"}\" loudly", "score": 0.0}"#;
        let value: serde_json::Value = parse_object(raw).unwrap();
        assert_eq!(value["score"], 0.0);
    }

    #[test]
    fn test_stray_brace_in_prose_before_json() {
        let closed = "Response {A} reads better.\n{\"score\": 1.0, \"reason\": \"clearer\"}";
        let verdict: Verdict = parse_object(closed).unwrap();
        assert_eq!(verdict.reason, "clearer");

        let unclosed = "Response {A is better overall. {\"score\": 0.5, \"reason\": \"tie\"}";
        let verdict: Verdict = parse_object(unclosed).unwrap();
        assert_eq!(verdict.score, 0.5);
    }

    #[test]
    fn test_stray_bracket_before_array() {
        let raw = "Options [see below]:\n[\"first rubric\", \"second rubric\"]";
        let parsed: Vec<String> = parse_array(raw).unwrap();
        assert_eq!(parsed, vec!["first rubric", "second rubric"]);
    }

    #[test]
    fn test_reports_first_parse_error() {
        let err = parse_object::<Verdict>("{not json}").unwrap_err();
        assert!(err.starts_with("invalid JSON object"));
    }
}
