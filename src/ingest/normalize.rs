//! Schema-agnostic normalization of raw cloud log payloads.
//!
//! Raw entries arrive as JSON objects with wildly inconsistent nesting
//! (top-level fields, `jsonPayload`, `textPayload`, `protoPayload`). The
//! normalizer walks a fixed priority list per field and always produces a
//! complete canonical record; only a payload that is not an object at all
//! is rejected.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::ingest::NormalizeError;

/// Log severity, following the 9-level cloud logging scale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Default,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Default => "DEFAULT",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Alert => "ALERT",
            Severity::Emergency => "EMERGENCY",
        }
    }

    /// Syslog-style numeric codes: 0 = EMERGENCY .. 7 = DEBUG.
    pub fn from_numeric(code: i64) -> Severity {
        match code {
            0 => Severity::Emergency,
            1 => Severity::Alert,
            2 => Severity::Critical,
            3 => Severity::Error,
            4 => Severity::Warning,
            5 => Severity::Notice,
            6 => Severity::Info,
            7 => Severity::Debug,
            _ => Severity::Default,
        }
    }

    pub fn from_name(name: &str) -> Severity {
        match name.to_ascii_uppercase().as_str() {
            "DEBUG" => Severity::Debug,
            "INFO" => Severity::Info,
            "NOTICE" => Severity::Notice,
            "WARNING" | "WARN" => Severity::Warning,
            "ERROR" | "ERR" => Severity::Error,
            "CRITICAL" | "CRIT" => Severity::Critical,
            "ALERT" => Severity::Alert,
            "EMERGENCY" | "EMERG" => Severity::Emergency,
            _ => Severity::Default,
        }
    }

    /// True for the severities counted by the error-rate detector.
    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical log record. Immutable after storage except for the
/// `is_anomaly` flag, which the store sets exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedLogEntry {
    /// Buffer position. Assigned by the store; absent before storage and
    /// stripped on persistence (the storage key carries it).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub index: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_labels: BTreeMap<String, String>,
    /// Request latency, when the payload carries one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub is_anomaly: bool,
    /// The original payload, preserved verbatim for replay and debugging.
    pub raw_log: Value,
}

impl NormalizedLogEntry {
    /// Document the rule engine evaluates field paths against: the raw
    /// payload overlaid with the canonical fields, so both
    /// `$jsonPayload.error_code` and `$severity` resolve.
    pub fn rule_document(&self) -> Value {
        let mut doc = match &self.raw_log {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        doc.insert("severity".into(), Value::String(self.severity.as_str().into()));
        doc.insert("message".into(), Value::String(self.message.clone()));
        doc.insert("timestamp".into(), Value::String(self.timestamp.to_rfc3339()));
        if let Some(rt) = &self.resource_type {
            doc.insert("resource_type".into(), Value::String(rt.clone()));
        }
        Value::Object(doc)
    }
}

/// Normalize one raw payload into a canonical record.
///
/// Missing optional fields never fail; only a payload that is not a JSON
/// object is an error.
pub fn normalize(raw: &Value) -> Result<NormalizedLogEntry, NormalizeError> {
    let obj = raw.as_object().ok_or_else(|| NormalizeError::NotAnObject {
        found: json_type_name(raw),
    })?;

    let payload = obj
        .get("jsonPayload")
        .or_else(|| obj.get("json_payload"))
        .and_then(Value::as_object);

    let timestamp = extract_timestamp(obj, payload);
    let severity = extract_severity(obj, payload);
    let message = extract_message(raw, obj, payload);
    let (resource_type, resource_labels) = extract_resource(obj);
    let latency_ms = extract_latency(obj, payload);

    Ok(NormalizedLogEntry {
        index: None,
        timestamp,
        severity,
        message,
        resource_type,
        resource_labels,
        latency_ms,
        is_anomaly: false,
        raw_log: raw.clone(),
    })
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn extract_timestamp(obj: &Map<String, Value>, payload: Option<&Map<String, Value>>) -> DateTime<Utc> {
    let candidate = obj
        .get("timestamp")
        .or_else(|| payload.and_then(|p| p.get("timestamp")))
        .or_else(|| payload.and_then(|p| p.get("time")))
        .or_else(|| obj.get("receiveTimestamp"))
        .or_else(|| obj.get("receive_timestamp"));

    match candidate {
        Some(Value::String(s)) => parse_timestamp(s).unwrap_or_else(Utc::now),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now),
        _ => Utc::now(),
    }
}

/// RFC3339 with offset, trailing `Z`, or a bare naive timestamp (taken as
/// UTC). Anything else is unparseable.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    None
}

fn extract_severity(obj: &Map<String, Value>, payload: Option<&Map<String, Value>>) -> Severity {
    let candidate = obj
        .get("severity")
        .or_else(|| payload.and_then(|p| p.get("severity")))
        .or_else(|| payload.and_then(|p| p.get("level")))
        .or_else(|| payload.and_then(|p| p.get("priority")));

    match candidate {
        Some(Value::String(s)) => Severity::from_name(s),
        Some(Value::Number(n)) => n.as_i64().map(Severity::from_numeric).unwrap_or_default(),
        _ => Severity::Default,
    }
}

fn extract_message(
    raw: &Value,
    obj: &Map<String, Value>,
    payload: Option<&Map<String, Value>>,
) -> String {
    let candidate = obj
        .get("textPayload")
        .or_else(|| obj.get("text_payload"))
        .or_else(|| payload.and_then(|p| p.get("message")))
        .or_else(|| payload.and_then(|p| p.get("msg")))
        .or_else(|| payload.and_then(|p| p.get("log")))
        .or_else(|| payload.and_then(|p| p.get("event")))
        .or_else(|| {
            obj.get("protoPayload")
                .and_then(Value::as_object)
                .and_then(|p| p.get("methodName"))
        });

    match candidate {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => raw.to_string(),
    }
}

fn extract_resource(obj: &Map<String, Value>) -> (Option<String>, BTreeMap<String, String>) {
    if let Some(resource) = obj.get("resource").and_then(Value::as_object) {
        let rtype = resource
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);
        let labels = resource
            .get("labels")
            .and_then(Value::as_object)
            .map(stringify_map)
            .unwrap_or_default();
        return (rtype, labels);
    }

    let rtype = obj
        .get("resource_type")
        .and_then(Value::as_str)
        .map(str::to_string);
    let labels = obj
        .get("resource_labels")
        .and_then(Value::as_object)
        .map(stringify_map)
        .unwrap_or_default();
    (rtype, labels)
}

fn stringify_map(map: &Map<String, Value>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), s)
        })
        .collect()
}

fn extract_latency(obj: &Map<String, Value>, payload: Option<&Map<String, Value>>) -> Option<f64> {
    if let Some(ms) = payload.and_then(|p| p.get("latency_ms")).and_then(Value::as_f64) {
        return Some(ms);
    }
    // httpRequest.latency arrives as a duration string, e.g. "1.234s".
    let latency = obj
        .get("httpRequest")
        .and_then(Value::as_object)
        .and_then(|r| r.get("latency"))
        .and_then(Value::as_str)?;
    latency.strip_suffix('s')?.trim().parse::<f64>().ok().map(|secs| secs * 1000.0)
}
