//! Pulls the generated text out of an arbitrary JSON response.
//!
//! Paths look like `choices[0].message.content`: dot-separated segments,
//! each an optional object key followed by zero or more `[n]` indices.

use serde_json::{Number, Value};

/// One parsed path segment.
#[derive(Debug, PartialEq, Eq)]
struct Segment<'a> {
    key: Option<&'a str>,
    indices: Vec<usize>,
}

fn parse_segment(token: &str) -> Option<Segment<'_>> {
    if token.is_empty() {
        return None;
    }

    let (key, mut rest) = match token.find('[') {
        Some(pos) => (&token[..pos], &token[pos..]),
        None => (token, ""),
    };

    let mut indices = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indices.push(inner[..close].trim().parse::<usize>().ok()?);
        rest = &inner[close + 1..];
    }

    Some(Segment {
        key: (!key.is_empty()).then_some(key),
        indices,
    })
}

/// Walks `path` from `root` and renders the terminal scalar as text.
///
/// Returns `None` when a key is missing, an index is out of range, the
/// path is malformed, or the terminal value is an object, array or null.
pub fn extract_by_path(root: &Value, path: &str) -> Option<String> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let mut current = root;
    for token in path.split('.') {
        let segment = parse_segment(token)?;
        if let Some(key) = segment.key {
            current = current.as_object()?.get(key)?;
        }
        for index in segment.indices {
            current = current.as_array()?.get(index)?;
        }
    }

    render_scalar(current)
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(render_number(n)),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn render_number(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            format!("{}", f as i64)
        }
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Resolves the response text for one job.
///
/// Tries the per-task override path, then the configured default path,
/// then the structural fallback. An empty string means "no usable content".
pub fn extract_text(body: &str, override_path: &str, default_path: &str) -> String {
    let root: Value = match serde_json::from_str(body) {
        Ok(root) => root,
        Err(e) => {
            tracing::debug!(error = %e, "response body is not JSON");
            return String::new();
        }
    };

    for path in [override_path, default_path] {
        if path.trim().is_empty() {
            continue;
        }
        match extract_by_path(&root, path) {
            Some(text) => return text,
            None => tracing::debug!(path, "response path did not resolve"),
        }
    }

    structural_fallback(&root)
}

/// `text` field if it is a string, else the first non-empty string field.
///
/// "First" follows the JSON map's iteration order, which callers must not
/// rely on when several candidates exist.
fn structural_fallback(root: &Value) -> String {
    let Some(map) = root.as_object() else {
        return String::new();
    };
    if let Some(Value::String(text)) = map.get("text") {
        return text.clone();
    }
    map.values()
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}
