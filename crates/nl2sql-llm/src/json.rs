use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::provider::{LlmError, Result};

/// Pull a JSON object out of free-form model output.
///
/// Accepts, in order: the whole text, an `<answer>` block, a ```json fenced
/// block, and finally the first balanced `{...}` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(v) = parse_object(trimmed) {
        return Some(v);
    }

    if let Some(inner) = between(trimmed, "<answer>", "</answer>") {
        if let Some(v) = extract_json(inner) {
            return Some(v);
        }
    }

    if let Some(inner) = fenced_block(trimmed) {
        if let Some(v) = parse_object(inner.trim()) {
            return Some(v);
        }
    }

    first_balanced_object(trimmed).and_then(parse_object)
}

/// [`extract_json`] followed by typed deserialization.
pub fn extract_json_as<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value = extract_json(text).ok_or_else(|| {
        LlmError::MalformedOutput(format!("no JSON object in: {}", preview(text)))
    })?;
    serde_json::from_value(value).map_err(|e| LlmError::MalformedOutput(e.to_string()))
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(&text[start..end])
}

/// Body of the first ``` fence, skipping an optional language tag.
pub fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let rest = &text[start..];
    let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &rest[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    let mut s: String = text.chars().take(120).collect();
    if text.chars().count() > 120 {
        s.push_str("...");
    }
    s
}
