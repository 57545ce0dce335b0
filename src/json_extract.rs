//! JSON decomposition into addressable text records.
//!
//! The root decides the addressing scheme:
//!
//! | Root | Emitted addresses |
//! |------|-------------------|
//! | array | `$[0]`, `$[1]`, … one per element |
//! | object | `$.key[i]` per element when the value is an array, else `$.key` |
//! | scalar | `$` |
//!
//! Each element is rendered to `key: value` lines (see [`render_value`])
//! and prefixed with a `[Source: … | JSON path: …]` header. Elements that
//! render to nothing are skipped, never emitted.

use serde_json::Value;
use std::path::Path;

use crate::error::SkipReason;
use crate::models::{record_id, Metadata, Record, FILE_PATH_KEY, JSON_PATH_KEY};

/// Records extracted from one JSON document, plus the elements left out.
#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<Record>,
    pub skipped: Vec<(String, SkipReason)>,
}

/// Read and parse `path`, then extract its records.
///
/// Returns `Err` when the file cannot be read or is not valid JSON; the
/// caller skips the file.
pub fn extract_file(path: &Path) -> Result<Extraction, SkipReason> {
    let raw = std::fs::read_to_string(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
    let parsed: Value =
        serde_json::from_str(&raw).map_err(|e| SkipReason::InvalidJson(e.to_string()))?;
    Ok(extract_records(&parsed, path))
}

/// Decompose a parsed document into records, in address order.
pub fn extract_records(parsed: &Value, source_path: &Path) -> Extraction {
    let mut extraction = Extraction::default();
    for (json_path, element) in addressed_elements(parsed) {
        match emit_element(&json_path, element, source_path) {
            Ok(record) => extraction.records.push(record),
            Err(reason) => {
                tracing::debug!(
                    file = %source_path.display(),
                    json_path = %json_path,
                    reason = %reason,
                    "skipping JSON element"
                );
                extraction.skipped.push((json_path, reason));
            }
        }
    }
    extraction
}

/// Every addressable element of `parsed` with its JSONPath-like address.
pub fn addressed_elements(parsed: &Value) -> Vec<(String, &Value)> {
    match parsed {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (format!("$[{}]", i), item))
            .collect(),
        Value::Object(map) => {
            let mut out = Vec::new();
            for (key, value) in map {
                match value {
                    Value::Array(items) => out.extend(
                        items
                            .iter()
                            .enumerate()
                            .map(|(i, item)| (format!("$.{}[{}]", key, i), item)),
                    ),
                    other => out.push((format!("$.{}", key), other)),
                }
            }
            out
        }
        scalar => vec![("$".to_string(), scalar)],
    }
}

fn emit_element(json_path: &str, element: &Value, source_path: &Path) -> Result<Record, SkipReason> {
    let (body, mut metadata) = render_element(element);
    if body.is_empty() {
        return Err(SkipReason::EmptyText);
    }

    let file_name = source_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let text = format!("[Source: {} | JSON path: {}]\n{}", file_name, json_path, body);

    // Pipeline keys win over same-named source fields so the address stays intact.
    metadata.insert(FILE_PATH_KEY.to_string(), source_path.display().to_string());
    metadata.insert(JSON_PATH_KEY.to_string(), json_path.to_string());

    Ok(Record::new(text, metadata).identified(record_id(source_path, json_path)))
}

/// Render one element to text lines plus its flattened field pairs.
///
/// Objects produce one `key: value` line per key and one metadata entry per
/// key; arrays produce a single comma-joined line; scalars render directly.
/// Lines without visible content are dropped.
pub fn render_element(element: &Value) -> (String, Metadata) {
    let mut metadata = Metadata::new();
    let lines: Vec<String> = match element {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| {
                let rendered = render_value(value);
                let line = format!("{}: {}", key, rendered);
                metadata.insert(key.clone(), rendered);
                line
            })
            .collect(),
        other => vec![render_value(other)],
    };

    let text = lines
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (text, metadata)
}

/// Stringify a JSON value.
///
/// `null` renders empty and booleans as `True` / `False`. Arrays join
/// with `", "`, and nested objects become `subkey: value` pairs joined
/// with `"; "`.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(", "),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, render_value(v)))
            .collect::<Vec<_>>()
            .join("; "),
    }
}
