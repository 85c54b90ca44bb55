//! Statistical anomaly detection: threshold checks over one analysis
//! window. Each check is independent and yields at most one anomaly.

use anyhow::Result;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::detect::metrics::{self, latency_stats, volume_spike};
use crate::detect::{
    affected_resources, sample_indices, AnalysisWindow, Anomaly, AnomalyKind, AnomalySeverity,
    DetectionMethod, DetectionThresholds, Detector,
};
use crate::ingest::NormalizedLogEntry;

/// Messages indicating a resource limit was hit.
const EXHAUSTION_KEYWORDS: &[&str] = &[
    "out of memory",
    "memory exhausted",
    "disk full",
    "no space left",
    "connection pool exhausted",
    "too many connections",
    "resource limit",
    "quota exceeded",
    "rate limit exceeded",
];

/// Minimum latency samples before the p95 check is meaningful.
const MIN_LATENCY_SAMPLES: usize = 10;

pub struct StatisticalDetector {
    thresholds: DetectionThresholds,
}

impl StatisticalDetector {
    pub fn new(thresholds: DetectionThresholds) -> Self {
        Self { thresholds }
    }

    fn detect_error_rate_spike(&self, window: &AnalysisWindow) -> Option<Anomaly> {
        let m = metrics::error_rate(&window.entries);
        if m.total == 0 || m.rate <= self.thresholds.error_rate_threshold {
            return None;
        }

        let errors = window.error_entries();
        let severity = if m.rate > 0.2 {
            AnomalySeverity::High
        } else {
            AnomalySeverity::Medium
        };

        Some(Anomaly {
            id: Uuid::new_v4(),
            kind: AnomalyKind::HighErrorRate,
            severity,
            detection_method: DetectionMethod::Statistical,
            description: format!(
                "Error rate spike: {:.1}% of {} logs (threshold {:.1}%)",
                m.rate * 100.0,
                m.total,
                self.thresholds.error_rate_threshold * 100.0
            ),
            confidence: (m.rate / self.thresholds.error_rate_threshold).min(1.0),
            metric_value: Some(m.rate),
            threshold_value: Some(self.thresholds.error_rate_threshold),
            affected_resources: affected_resources(&errors),
            sample_log_indices: sample_indices(&errors),
            timestamp: Utc::now(),
        })
    }

    fn detect_volume_spike(&self, window: &AnalysisWindow) -> Option<Anomaly> {
        let baseline = window.baseline.as_ref()?;
        let spike = volume_spike(
            window.entries.len(),
            baseline.average_volume,
            self.thresholds.volume_spike_multiplier,
        )?;

        let severity = if spike.ratio > 5.0 {
            AnomalySeverity::High
        } else {
            AnomalySeverity::Medium
        };
        let all: Vec<&NormalizedLogEntry> = window.entries.iter().collect();

        Some(Anomaly {
            id: Uuid::new_v4(),
            kind: AnomalyKind::UnusualPattern,
            severity,
            detection_method: DetectionMethod::Statistical,
            description: format!(
                "Log volume spike: {:.1}x baseline ({} vs {})",
                spike.ratio, spike.current_volume, spike.baseline_volume
            ),
            confidence: spike.confidence,
            metric_value: Some(spike.current_volume as f64),
            threshold_value: Some(spike.baseline_volume as f64),
            affected_resources: affected_resources(&all),
            sample_log_indices: sample_indices(&all),
            timestamp: Utc::now(),
        })
    }

    fn detect_latency_spike(&self, window: &AnalysisWindow) -> Option<Anomaly> {
        let stats = latency_stats(&window.entries);
        if stats.sample_size < MIN_LATENCY_SAMPLES {
            return None;
        }
        if stats.p95_ms <= self.thresholds.latency_threshold_ms {
            return None;
        }

        let severity = if stats.p95_ms > self.thresholds.latency_threshold_ms * 2.0 {
            AnomalySeverity::High
        } else {
            AnomalySeverity::Medium
        };
        let slow: Vec<&NormalizedLogEntry> = window
            .entries
            .iter()
            .filter(|e| e.latency_ms.is_some_and(|l| l > self.thresholds.latency_threshold_ms))
            .collect();

        Some(Anomaly {
            id: Uuid::new_v4(),
            kind: AnomalyKind::HighLatency,
            severity,
            detection_method: DetectionMethod::Statistical,
            description: format!(
                "Latency spike: p95 {:.0}ms over {} samples (threshold {:.0}ms)",
                stats.p95_ms, stats.sample_size, self.thresholds.latency_threshold_ms
            ),
            confidence: (stats.p95_ms / self.thresholds.latency_threshold_ms).min(1.0),
            metric_value: Some(stats.p95_ms),
            threshold_value: Some(self.thresholds.latency_threshold_ms),
            affected_resources: affected_resources(&slow),
            sample_log_indices: sample_indices(&slow),
            timestamp: Utc::now(),
        })
    }

    fn detect_resource_exhaustion(&self, window: &AnalysisWindow) -> Option<Anomaly> {
        let matching: Vec<&NormalizedLogEntry> = window
            .entries
            .iter()
            .filter(|e| {
                let message = e.message.to_lowercase();
                EXHAUSTION_KEYWORDS.iter().any(|kw| message.contains(kw))
            })
            .collect();

        if matching.len() < 3 {
            return None;
        }

        Some(Anomaly {
            id: Uuid::new_v4(),
            kind: AnomalyKind::ResourceExhaustion,
            severity: AnomalySeverity::High,
            detection_method: DetectionMethod::Statistical,
            description: format!(
                "Resource exhaustion: {} indicator logs in window",
                matching.len()
            ),
            confidence: (matching.len() as f64 / 10.0).min(1.0),
            metric_value: Some(matching.len() as f64),
            threshold_value: Some(3.0),
            affected_resources: affected_resources(&matching),
            sample_log_indices: sample_indices(&matching),
            timestamp: Utc::now(),
        })
    }
}

#[async_trait::async_trait]
impl Detector for StatisticalDetector {
    fn name(&self) -> &'static str {
        "statistical"
    }

    async fn analyze(&self, window: &AnalysisWindow) -> Result<Vec<Anomaly>> {
        if window.entries.is_empty() {
            return Ok(Vec::new());
        }

        let anomalies: Vec<Anomaly> = [
            self.detect_error_rate_spike(window),
            self.detect_volume_spike(window),
            self.detect_latency_spike(window),
            self.detect_resource_exhaustion(window),
        ]
        .into_iter()
        .flatten()
        .collect();

        debug!(count = anomalies.len(), "statistical pass complete");
        Ok(anomalies)
    }
}
