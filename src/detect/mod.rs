//! Anomaly detection -- shared anomaly model, detector seam, and the
//! statistical/pattern engines that analyze windows of stored logs.

pub mod correlation;
pub mod metrics;
pub mod pattern;
pub mod statistical;
pub mod thresholds;

pub use thresholds::{DetectionThresholds, ThresholdUpdate};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::metrics::BaselineMetrics;
use crate::ingest::NormalizedLogEntry;

/// Classified anomaly kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    HighErrorRate,
    HighLatency,
    RepeatedErrors,
    UnusualPattern,
    ResourceExhaustion,
    DeploymentCorrelation,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::HighErrorRate => "HIGH_ERROR_RATE",
            AnomalyKind::HighLatency => "HIGH_LATENCY",
            AnomalyKind::RepeatedErrors => "REPEATED_ERRORS",
            AnomalyKind::UnusualPattern => "UNUSUAL_PATTERN",
            AnomalyKind::ResourceExhaustion => "RESOURCE_EXHAUSTION",
            AnomalyKind::DeploymentCorrelation => "DEPLOYMENT_CORRELATION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalySeverity::Low => "LOW",
            AnomalySeverity::Medium => "MEDIUM",
            AnomalySeverity::High => "HIGH",
            AnomalySeverity::Critical => "CRITICAL",
        }
    }

    /// One level up, saturating at CRITICAL.
    pub fn raise(self) -> Self {
        match self {
            AnomalySeverity::Low => AnomalySeverity::Medium,
            AnomalySeverity::Medium => AnomalySeverity::High,
            AnomalySeverity::High | AnomalySeverity::Critical => AnomalySeverity::Critical,
        }
    }

    /// One level down, saturating at LOW.
    pub fn lower(self) -> Self {
        match self {
            AnomalySeverity::Critical => AnomalySeverity::High,
            AnomalySeverity::High => AnomalySeverity::Medium,
            AnomalySeverity::Medium | AnomalySeverity::Low => AnomalySeverity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionMethod {
    Statistical,
    Pattern,
    Correlation,
    AiAnalysis,
}

/// A detected anomaly. Read-only once emitted to collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    pub detection_method: DetectionMethod,
    pub description: String,
    /// In [0, 1].
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metric_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub threshold_value: Option<f64>,
    pub affected_resources: Vec<String>,
    /// Buffer indices of up to 5 representative logs.
    pub sample_log_indices: Vec<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Analysis input: one window of stored records plus the baseline from
/// the previous cycle, when one exists.
pub struct AnalysisWindow {
    pub entries: Vec<NormalizedLogEntry>,
    pub baseline: Option<BaselineMetrics>,
}

impl AnalysisWindow {
    pub fn new(entries: Vec<NormalizedLogEntry>, baseline: Option<BaselineMetrics>) -> Self {
        Self { entries, baseline }
    }

    pub fn error_entries(&self) -> Vec<&NormalizedLogEntry> {
        self.entries.iter().filter(|e| e.severity.is_error()).collect()
    }
}

/// Seam for window-scoped anomaly engines. Detectors never mutate shared
/// state; each returns its own independent findings.
#[async_trait::async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(&self, window: &AnalysisWindow) -> Result<Vec<Anomaly>>;
}

/// Up to 5 representative buffer indices.
pub(crate) fn sample_indices(entries: &[&NormalizedLogEntry]) -> Vec<i64> {
    entries.iter().filter_map(|e| e.index).take(5).collect()
}

/// Distinct resource types, sorted for stable cooldown keys.
pub(crate) fn affected_resources(entries: &[&NormalizedLogEntry]) -> Vec<String> {
    let mut resources: Vec<String> = entries
        .iter()
        .filter_map(|e| e.resource_type.clone())
        .collect();
    resources.sort();
    resources.dedup();
    resources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_raise_lower_saturate() {
        assert_eq!(AnomalySeverity::Low.raise(), AnomalySeverity::Medium);
        assert_eq!(AnomalySeverity::Critical.raise(), AnomalySeverity::Critical);
        assert_eq!(AnomalySeverity::Medium.lower(), AnomalySeverity::Low);
        assert_eq!(AnomalySeverity::Low.lower(), AnomalySeverity::Low);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AnomalySeverity::Critical > AnomalySeverity::High);
        assert!(AnomalySeverity::Medium > AnomalySeverity::Low);
    }
}
