//! Request payload assembly.
//!
//! Extra fields come from JSON object strings (one global, one per task).
//! A field set to `null` or `""` in an extra map deletes the field from the
//! final payload, which is how a task removes a template or global value.

use crate::error::{Result, StpError};
use serde_json::{json, Map, Value};

/// Per-task overrides pulled out of the task's extra fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOverrides {
    pub api_endpoint: String,
    pub token: String,
    pub text_path: String,
}

const ENDPOINT_KEY: &str = "APIEndpoint";
const TOKEN_KEY: &str = "Token";
const TEXT_PATH_KEY: &str = "TEXTPath";

/// Parses an extra-config string. Blank input yields an empty map.
pub fn parse_extra_config(raw: &str) -> Result<Map<String, Value>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(StpError::invalid_extra_config(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Removes the override keys from `extra` and returns them trimmed.
///
/// Non-string values under an override key are dropped without effect.
pub fn extract_runtime_overrides(mut extra: Map<String, Value>) -> (RuntimeOverrides, Map<String, Value>) {
    let mut take = |key: &str| match extra.remove(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        _ => String::new(),
    };
    let overrides = RuntimeOverrides {
        api_endpoint: take(ENDPOINT_KEY),
        token: take(TOKEN_KEY),
        text_path: take(TEXT_PATH_KEY),
    };
    (overrides, extra)
}

/// Shallow merge; keys in `overrides` win.
pub fn merge_extra(base: &Map<String, Value>, overrides: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    for (k, v) in overrides {
        out.insert(k.clone(), v.clone());
    }
    out
}

/// Inputs for [`build_payload`].
#[derive(Debug, Clone, Default)]
pub struct PayloadInput<'a> {
    pub model: &'a str,
    pub temperature: f64,
    pub max_tokens: u32,
    pub prompt: &'a str,
    pub user_text: &'a str,
    /// Already merged extras (global overlaid by per-task).
    pub extra: Map<String, Value>,
}

/// Builds the chat-completion style body and strips empty fields.
pub fn build_payload(input: PayloadInput<'_>) -> Map<String, Value> {
    let mut payload = Map::new();
    if !input.model.is_empty() {
        payload.insert("model".into(), json!(input.model));
    }
    payload.insert(
        "messages".into(),
        json!([
            {"role": "developer", "content": input.prompt},
            {"role": "user", "content": input.user_text},
        ]),
    );
    if input.max_tokens > 0 {
        payload.insert("max_tokens".into(), json!(input.max_tokens));
    }
    payload.insert("temperature".into(), json!(input.temperature));

    for (k, v) in input.extra {
        payload.insert(k, v);
    }
    strip_empty_fields(payload)
}

/// Recursively drops null, blank strings, empty arrays and objects that end
/// up empty. Numbers (zero included) and booleans are kept.
pub fn strip_empty_fields(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter_map(|(k, v)| clean_value(v).map(|v| (k, v)))
        .collect()
}

fn clean_value(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::Object(map) => {
            let map = strip_empty_fields(map);
            (!map.is_empty()).then_some(Value::Object(map))
        }
        Value::Array(items) => {
            let items: Vec<Value> = items.into_iter().filter_map(clean_value).collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        other => Some(other),
    }
}
