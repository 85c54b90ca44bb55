//! Log ingestion -- payload parsing, normalization, and the per-record
//! rule-matching path into the indexed store.

pub mod normalize;
pub mod parser;

pub use normalize::{normalize, NormalizedLogEntry, Severity};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use crate::detect::correlation::HybridDetector;
use crate::store::IndexedLogStore;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("raw payload is not a structured record (got {found})")]
    NotAnObject { found: &'static str },
}

/// Input format hint for `ingest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum IngestFormat {
    /// Detect JSON document vs line-delimited JSON from the body.
    #[default]
    Auto,
    Json,
    Ndjson,
}

impl std::fmt::Display for IngestFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestFormat::Auto => write!(f, "auto"),
            IngestFormat::Json => write!(f, "json"),
            IngestFormat::Ndjson => write!(f, "ndjson"),
        }
    }
}

/// A single record that failed validation during ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogValidationError {
    pub field: String,
    pub error_type: String,
    pub message: String,
    pub raw_value: Value,
}

/// Aggregate outcome of one ingestion call. Partial success is normal;
/// callers distinguish it from total failure via the counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionResult {
    pub processed_count: usize,
    pub failed_count: usize,
    pub validation_errors: Vec<LogValidationError>,
    pub processing_time_ms: f64,
}

/// Ingestion front door: parses a raw batch, normalizes each record,
/// stores it, and runs the per-record rule/correlation path.
pub struct IngestionService {
    store: Arc<IndexedLogStore>,
    hybrid: Arc<HybridDetector>,
    /// Optional JSONL sink for records that failed normalization.
    failed_log_path: Option<PathBuf>,
}

impl IngestionService {
    pub fn new(
        store: Arc<IndexedLogStore>,
        hybrid: Arc<HybridDetector>,
        failed_log_path: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            hybrid,
            failed_log_path,
        }
    }

    /// Ingest a raw text batch. Per-record failures are recorded and
    /// ingestion continues; only the counts say how much survived.
    pub async fn ingest(
        &self,
        body: &str,
        source: &str,
        format: IngestFormat,
    ) -> Result<IngestionResult> {
        let started = Instant::now();
        let batch = match format {
            IngestFormat::Auto | IngestFormat::Json => parser::parse_text(body),
            IngestFormat::Ndjson => {
                // Force line-by-line parsing even if the body happens to be
                // a valid single document.
                let mut b = parser::ParsedBatch::default();
                for (line_no, line) in body.lines().enumerate() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(line) {
                        Ok(v) => b.records.push(v),
                        Err(e) => b.errors.push((line_no + 1, e.to_string())),
                    }
                }
                b
            }
        };

        let mut result = IngestionResult {
            processed_count: 0,
            failed_count: 0,
            validation_errors: Vec::new(),
            processing_time_ms: 0.0,
        };

        for (line_no, message) in &batch.errors {
            result.failed_count += 1;
            result.validation_errors.push(LogValidationError {
                field: format!("line {line_no}"),
                error_type: "parse".into(),
                message: message.clone(),
                raw_value: Value::Null,
            });
        }

        for raw in &batch.records {
            match self.ingest_record(raw).await {
                Ok(index) => {
                    result.processed_count += 1;
                    debug!(%source, index, "log stored");
                }
                Err(failure) => {
                    result.failed_count += 1;
                    warn!(%source, error_type = %failure.error_type, "record rejected: {}", failure.message);
                    self.spool_failed(raw);
                    result.validation_errors.push(failure);
                }
            }
        }

        result.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(result)
    }

    /// Ingest an already-parsed batch of raw records.
    pub async fn ingest_values(&self, values: Vec<Value>, source: &str) -> Result<IngestionResult> {
        let started = Instant::now();
        let mut result = IngestionResult {
            processed_count: 0,
            failed_count: 0,
            validation_errors: Vec::new(),
            processing_time_ms: 0.0,
        };
        for raw in &values {
            match self.ingest_record(raw).await {
                Ok(_) => result.processed_count += 1,
                Err(failure) => {
                    result.failed_count += 1;
                    warn!(%source, "record rejected: {}", failure.message);
                    self.spool_failed(raw);
                    result.validation_errors.push(failure);
                }
            }
        }
        result.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(result)
    }

    /// Normalize, store, rule-match, and (if matched) flag one record.
    async fn ingest_record(&self, raw: &Value) -> Result<i64, LogValidationError> {
        let entry = normalize(raw).map_err(|e| LogValidationError {
            field: "raw".into(),
            error_type: "normalize".into(),
            message: e.to_string(),
            raw_value: raw.clone(),
        })?;

        let index = self.store.store(&entry).await.map_err(|e| LogValidationError {
            field: "store".into(),
            error_type: "store".into(),
            message: e.to_string(),
            raw_value: raw.clone(),
        })?;

        let verdict = self.hybrid.detect(&entry);
        if verdict.is_anomaly {
            if let Err(e) = self.store.flag_anomaly(index).await {
                warn!(index, "failed to flag rule-matched log: {e}");
            } else {
                debug!(
                    index,
                    source = %verdict.source,
                    confidence = verdict.confidence,
                    "log flagged anomalous on ingest"
                );
            }
        }

        Ok(index)
    }

    fn spool_failed(&self, raw: &Value) {
        let Some(path) = &self.failed_log_path else {
            return;
        };
        let line = raw.to_string();
        let appended = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = appended {
            warn!(path = %path.display(), "failed to spool rejected record: {e}");
        }
    }
}
