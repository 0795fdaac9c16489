//! Locating JSON inside free-form model output.
//!
//! Models wrap answers in markdown fences, prose, or `<think>` blocks. Every
//! function here fails closed: `None` when no candidate parses.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());

pub fn strip_reasoning(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

/// Candidate JSON snippets, most specific first.
fn candidates(text: &str) -> Vec<String> {
    let text = strip_reasoning(text);
    let mut out = vec![text.clone()];

    for caps in FENCED_BLOCK.captures_iter(&text) {
        if let Some(body) = caps.get(1) {
            out.push(body.as_str().trim().to_string());
        }
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                out.push(text[start..=end].to_string());
            }
        }
    }

    out
}

pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    candidates(text)
        .iter()
        .find_map(|c| match serde_json::from_str::<Value>(c) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// An array of items. A lone object is wrapped; an object holding a single
/// array of objects is unwrapped.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    let cands = candidates(text);

    if let Some(items) = cands.iter().find_map(|c| match serde_json::from_str::<Value>(c) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }) {
        return Some(items);
    }

    let map = extract_json_object(text)?;
    let nested = map.values().find_map(|v| match v {
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => Some(items.clone()),
        _ => None,
    });
    Some(nested.unwrap_or_else(|| vec![Value::Object(map)]))
}
