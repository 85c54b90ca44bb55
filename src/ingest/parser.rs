//! Raw payload parsing: turns an uploaded/streamed body into individual
//! JSON records before normalization.

use serde_json::Value;

/// Outcome of splitting a raw body into records. Line-level parse
/// failures are reported alongside whatever did parse.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub records: Vec<Value>,
    /// (1-based line number, parse error message)
    pub errors: Vec<(usize, String)>,
}

/// Split a raw text body into JSON records.
///
/// Tries the whole body as one JSON document first (array → its elements,
/// object → one record); otherwise falls back to line-delimited JSON,
/// skipping blank lines and recording per-line failures.
pub fn parse_text(body: &str) -> ParsedBatch {
    let mut batch = ParsedBatch::default();

    if let Ok(value) = serde_json::from_str::<Value>(body.trim()) {
        match value {
            Value::Array(items) => batch.records = items,
            other => batch.records.push(other),
        }
        return batch;
    }

    for (line_no, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => batch.records.push(value),
            Err(e) => batch.errors.push((line_no + 1, e.to_string())),
        }
    }
    batch
}

/// Flatten an already-parsed JSON value into records (array → elements,
/// anything else → single record).
pub fn expand_value(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}
