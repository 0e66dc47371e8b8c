//! Strict-JSON extraction from model output.
//!
//! Models asked for raw JSON still wrap it in fences or prose often enough
//! that every synthesis call goes through this extractor before schema
//! decoding.

use serde_json::Value;

use crate::error::{Error, Result};

/// Parse the JSON value embedded in `text`.
///
/// Tries, in order: the whole trimmed text, the contents of the first
/// fenced code block, and the widest `[...]` / `{...}` slice. Anything
/// unparseable is a [`Error::Schema`].
pub fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::schema("model returned empty output"));
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(block.trim()) {
            return Ok(value);
        }
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let Some(slice) = widest_slice(trimmed, open, close) {
            if let Ok(value) = serde_json::from_str(slice) {
                return Ok(value);
            }
        }
    }

    Err(Error::schema(format!(
        "no parseable JSON in model output: {}",
        truncate(trimmed, 200)
    )))
}

/// Contents of the first ``` fenced block, tolerating a language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn widest_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_json_array() {
        let value = extract_json(r#"[{"event": "outcome one here", "probability": 0.6}]"#).unwrap();
        assert_eq!(value[0]["probability"], 0.6);
    }

    #[test]
    fn test_fenced_block_with_language_tag() {
        let text = "Here is the result:\n```json\n[{\"event\": \"x\", \"probability\": 1.0}]\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!([{"event": "x", "probability": 1.0}]));
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let text = "The outcomes are [{\"event\": \"alpha beta gamma\", \"probability\": 1.0}] as requested.";
        let value = extract_json(text).unwrap();
        assert_eq!(value[0]["event"], "alpha beta gamma");
    }

    #[test]
    fn test_object_extraction() {
        let text = "Sure! {\"summary\": \"done\", \"confidence\": \"high\"} hope that helps";
        let value = extract_json(text).unwrap();
        assert_eq!(value["confidence"], "high");
    }

    #[test]
    fn test_unparseable_is_schema_error() {
        let err = extract_json("I could not find any relevant information.").unwrap_err();
        assert!(matches!(err, Error::Schema(_)));

        let err = extract_json("").unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
