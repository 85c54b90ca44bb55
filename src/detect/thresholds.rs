//! Detection thresholds and their typed partial-update surface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("{field} must be greater than zero (got {value})")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} must be within [0, 1] (got {value})")]
    OutOfUnitRange { field: &'static str, value: f64 },
}

/// Tunable detection thresholds. Mutated only through
/// [`DetectionThresholds::apply`]; detectors are re-parameterized from the
/// current values on every analysis cycle so updates take effect on the
/// next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionThresholds {
    /// Error-rate above which the window is anomalous (exclusive bound).
    pub error_rate_threshold: f64,
    pub latency_threshold_ms: f64,
    pub volume_spike_multiplier: f64,
    /// Minimum occurrences before a normalized pattern is reported.
    pub min_pattern_occurrences: usize,
    pub time_window_minutes: i64,
    pub pattern_confidence_threshold: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.05,
            latency_threshold_ms: 5000.0,
            volume_spike_multiplier: 3.0,
            min_pattern_occurrences: 5,
            time_window_minutes: 10,
            pattern_confidence_threshold: 0.7,
        }
    }
}

impl DetectionThresholds {
    /// Apply a partial update, validating the result.
    pub fn apply(&self, update: &ThresholdUpdate) -> Result<Self, ThresholdError> {
        let mut next = *self;
        if let Some(v) = update.error_rate_threshold {
            next.error_rate_threshold = v;
        }
        if let Some(v) = update.latency_threshold_ms {
            next.latency_threshold_ms = v;
        }
        if let Some(v) = update.volume_spike_multiplier {
            next.volume_spike_multiplier = v;
        }
        if let Some(v) = update.min_pattern_occurrences {
            next.min_pattern_occurrences = v;
        }
        if let Some(v) = update.time_window_minutes {
            next.time_window_minutes = v;
        }
        if let Some(v) = update.pattern_confidence_threshold {
            next.pattern_confidence_threshold = v;
        }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(ThresholdError::OutOfUnitRange {
                field: "error_rate_threshold",
                value: self.error_rate_threshold,
            });
        }
        if !(0.0..=1.0).contains(&self.pattern_confidence_threshold) {
            return Err(ThresholdError::OutOfUnitRange {
                field: "pattern_confidence_threshold",
                value: self.pattern_confidence_threshold,
            });
        }
        if self.latency_threshold_ms <= 0.0 {
            return Err(ThresholdError::NotPositive {
                field: "latency_threshold_ms",
                value: self.latency_threshold_ms,
            });
        }
        if self.volume_spike_multiplier <= 0.0 {
            return Err(ThresholdError::NotPositive {
                field: "volume_spike_multiplier",
                value: self.volume_spike_multiplier,
            });
        }
        if self.time_window_minutes <= 0 {
            return Err(ThresholdError::NotPositive {
                field: "time_window_minutes",
                value: self.time_window_minutes as f64,
            });
        }
        Ok(())
    }
}

/// Partial threshold update: only named fields change.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdUpdate {
    pub error_rate_threshold: Option<f64>,
    pub latency_threshold_ms: Option<f64>,
    pub volume_spike_multiplier: Option<f64>,
    pub min_pattern_occurrences: Option<usize>,
    pub time_window_minutes: Option<i64>,
    pub pattern_confidence_threshold: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_update_touches_only_named_fields() {
        let base = DetectionThresholds::default();
        let next = base
            .apply(&ThresholdUpdate {
                error_rate_threshold: Some(0.1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(next.error_rate_threshold, 0.1);
        assert_eq!(next.latency_threshold_ms, base.latency_threshold_ms);
        assert_eq!(next.min_pattern_occurrences, base.min_pattern_occurrences);
    }

    #[test]
    fn test_invalid_update_rejected() {
        let base = DetectionThresholds::default();
        assert!(base
            .apply(&ThresholdUpdate {
                error_rate_threshold: Some(1.5),
                ..Default::default()
            })
            .is_err());
        assert!(base
            .apply(&ThresholdUpdate {
                latency_threshold_ms: Some(0.0),
                ..Default::default()
            })
            .is_err());
        // Original values survive a rejected update.
        assert_eq!(base, DetectionThresholds::default());
    }
}
