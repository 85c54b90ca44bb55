//! Window metrics shared by the detectors: error rates, interpolated
//! percentiles, latency stats, volume comparisons, and the baseline
//! snapshot carried between analysis cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::NormalizedLogEntry;

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorRateMetrics {
    pub total: usize,
    pub errors: usize,
    pub rate: f64,
}

pub fn error_rate(entries: &[NormalizedLogEntry]) -> ErrorRateMetrics {
    let total = entries.len();
    if total == 0 {
        return ErrorRateMetrics::default();
    }
    let errors = entries.iter().filter(|e| e.severity.is_error()).count();
    ErrorRateMetrics {
        total,
        errors,
        rate: errors as f64 / total as f64,
    }
}

/// Linear-interpolated percentile over sorted data. `p` in [0, 1].
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[sorted.len() - 1];
    }

    let position = p * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    if lower == upper {
        return sorted[lower];
    }
    let weight = position - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyStats {
    pub sample_size: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

pub fn latency_stats(entries: &[NormalizedLogEntry]) -> LatencyStats {
    let mut latencies: Vec<f64> = entries.iter().filter_map(|e| e.latency_ms).collect();
    if latencies.is_empty() {
        return LatencyStats::default();
    }
    latencies.sort_by(|a, b| a.partial_cmp(b).expect("latency is never NaN"));

    let sum: f64 = latencies.iter().sum();
    LatencyStats {
        sample_size: latencies.len(),
        avg_ms: sum / latencies.len() as f64,
        p50_ms: percentile(&latencies, 0.50),
        p95_ms: percentile(&latencies, 0.95),
        p99_ms: percentile(&latencies, 0.99),
        max_ms: latencies[latencies.len() - 1],
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VolumeSpike {
    pub current_volume: usize,
    pub baseline_volume: usize,
    pub ratio: f64,
    pub confidence: f64,
}

/// Compare current volume against a baseline; Some only when the ratio
/// exceeds the multiplier.
pub fn volume_spike(
    current_volume: usize,
    baseline_volume: usize,
    spike_multiplier: f64,
) -> Option<VolumeSpike> {
    if baseline_volume == 0 {
        return None;
    }
    let ratio = current_volume as f64 / baseline_volume as f64;
    if ratio <= spike_multiplier {
        return None;
    }
    Some(VolumeSpike {
        current_volume,
        baseline_volume,
        ratio,
        confidence: (ratio / spike_multiplier).min(1.0),
    })
}

/// Metrics from a previous analysis cycle, used as the comparison point
/// for volume spikes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineMetrics {
    pub average_volume: usize,
    pub average_error_rate: f64,
    pub updated_at: DateTime<Utc>,
}

pub fn baseline(entries: &[NormalizedLogEntry]) -> BaselineMetrics {
    BaselineMetrics {
        average_volume: entries.len(),
        average_error_rate: error_rate(entries).rate,
        updated_at: Utc::now(),
    }
}
