//! Pattern-based detection: groups structurally similar error messages by
//! replacing volatile substrings with placeholders, and finds repeated
//! error bursts inside fixed 5-minute windows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;
use uuid::Uuid;

use crate::detect::{
    AnalysisWindow, Anomaly, AnomalyKind, AnomalySeverity, DetectionMethod, DetectionThresholds,
    Detector,
};
use crate::ingest::NormalizedLogEntry;

/// Burst window width.
const BURST_WINDOW_SECS: i64 = 5 * 60;
/// Same normalized message this many times inside one window is a burst.
const BURST_MIN_REPEATS: usize = 5;
/// Occurrences before a normalized message becomes a reportable pattern.
const PATTERN_MIN_OCCURRENCES: usize = 3;

struct Normalizers {
    timestamp: Regex,
    uuid: Regex,
    ip: Regex,
    quoted: Regex,
    number: Regex,
}

fn normalizers() -> &'static Normalizers {
    static NORMALIZERS: OnceLock<Normalizers> = OnceLock::new();
    NORMALIZERS.get_or_init(|| Normalizers {
        timestamp: Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").expect("static regex"),
        uuid: Regex::new(r"\b[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}\b")
            .expect("static regex"),
        ip: Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("static regex"),
        quoted: Regex::new(r#"["']([^"']*)["']"#).expect("static regex"),
        number: Regex::new(r"\b\d+\b").expect("static regex"),
    })
}

/// Replace timestamps, UUIDs, IPs, quoted strings, and bare integers with
/// placeholder tokens so structurally identical messages group together.
/// The number pass runs last so it cannot shred UUIDs and IPs first.
pub fn normalize_message(message: &str) -> String {
    let n = normalizers();
    let s = n.timestamp.replace_all(message, "[TIMESTAMP]");
    let s = n.uuid.replace_all(&s, "[UUID]");
    let s = n.ip.replace_all(&s, "[IP]");
    let s = n.quoted.replace_all(&s, "[STRING]");
    let s = n.number.replace_all(&s, "[NUMBER]");
    s.trim().to_string()
}

/// A group of structurally similar error messages.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    pub pattern: String,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub affected_resources: Vec<String>,
    pub sample_message: String,
    pub sample_indices: Vec<i64>,
}

/// A normalized message repeating inside one 5-minute window.
#[derive(Debug, Clone)]
pub struct RepeatedBurst {
    pub pattern: String,
    pub count: usize,
    pub severity: AnomalySeverity,
}

#[derive(Debug, Default)]
pub struct PatternAnalysis {
    pub patterns: Vec<ErrorPattern>,
    pub bursts: Vec<RepeatedBurst>,
    /// avg(min(patterns/5, 1), min(bursts/3, 1))
    pub confidence: f64,
}

pub struct PatternDetector {
    thresholds: DetectionThresholds,
}

impl PatternDetector {
    pub fn new(thresholds: DetectionThresholds) -> Self {
        Self { thresholds }
    }

    /// Full pattern pass over the window's error-severity entries.
    pub fn analyze_patterns(&self, entries: &[NormalizedLogEntry]) -> PatternAnalysis {
        let errors: Vec<&NormalizedLogEntry> =
            entries.iter().filter(|e| e.severity.is_error()).collect();
        if errors.is_empty() {
            return PatternAnalysis::default();
        }

        let patterns = extract_error_patterns(&errors);
        let bursts = detect_bursts(&errors);
        let pattern_score = (patterns.len() as f64 / 5.0).min(1.0);
        let burst_score = (bursts.len() as f64 / 3.0).min(1.0);
        let confidence = if patterns.is_empty() && bursts.is_empty() {
            0.0
        } else {
            (pattern_score + burst_score) / 2.0
        };

        PatternAnalysis {
            patterns,
            bursts,
            confidence,
        }
    }
}

fn extract_error_patterns(errors: &[&NormalizedLogEntry]) -> Vec<ErrorPattern> {
    let mut groups: HashMap<String, Vec<&NormalizedLogEntry>> = HashMap::new();
    for &entry in errors {
        groups
            .entry(normalize_message(&entry.message))
            .or_default()
            .push(entry);
    }

    let mut patterns = Vec::new();
    for (pattern, members) in groups {
        if members.len() < PATTERN_MIN_OCCURRENCES {
            continue;
        }
        let first_seen = members.iter().map(|e| e.timestamp).min().expect("non-empty group");
        let last_seen = members.iter().map(|e| e.timestamp).max().expect("non-empty group");
        let mut affected: Vec<String> =
            members.iter().filter_map(|e| e.resource_type.clone()).collect();
        affected.sort();
        affected.dedup();

        patterns.push(ErrorPattern {
            pattern,
            count: members.len(),
            first_seen,
            last_seen,
            affected_resources: affected,
            sample_message: members[0].message.clone(),
            sample_indices: members.iter().filter_map(|e| e.index).take(5).collect(),
        });
    }

    patterns.sort_by(|a, b| b.count.cmp(&a.count));
    patterns
}

fn detect_bursts(errors: &[&NormalizedLogEntry]) -> Vec<RepeatedBurst> {
    let mut windows: HashMap<i64, Vec<&NormalizedLogEntry>> = HashMap::new();
    for &entry in errors {
        let key = entry.timestamp.timestamp().div_euclid(BURST_WINDOW_SECS);
        windows.entry(key).or_default().push(entry);
    }

    let mut bursts = Vec::new();
    for members in windows.values() {
        if members.len() < BURST_MIN_REPEATS {
            continue;
        }
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in members {
            *counts.entry(normalize_message(&entry.message)).or_default() += 1;
        }
        for (pattern, count) in counts {
            if count >= BURST_MIN_REPEATS {
                bursts.push(RepeatedBurst {
                    pattern,
                    count,
                    severity: if count >= 10 {
                        AnomalySeverity::High
                    } else {
                        AnomalySeverity::Medium
                    },
                });
            }
        }
    }

    bursts.sort_by(|a, b| b.count.cmp(&a.count));
    bursts
}

#[async_trait::async_trait]
impl Detector for PatternDetector {
    fn name(&self) -> &'static str {
        "pattern"
    }

    async fn analyze(&self, window: &AnalysisWindow) -> Result<Vec<Anomaly>> {
        let analysis = self.analyze_patterns(&window.entries);
        let min_occurrences = self.thresholds.min_pattern_occurrences;

        let anomalies: Vec<Anomaly> = analysis
            .patterns
            .iter()
            .filter(|p| p.count >= min_occurrences)
            .map(|p| Anomaly {
                id: Uuid::new_v4(),
                kind: AnomalyKind::RepeatedErrors,
                severity: if p.count >= 10 {
                    AnomalySeverity::High
                } else {
                    AnomalySeverity::Medium
                },
                detection_method: DetectionMethod::Pattern,
                description: format!(
                    "Repeated error pattern ({} occurrences): {}",
                    p.count, p.pattern
                ),
                confidence: (p.count as f64 / min_occurrences as f64).min(1.0),
                metric_value: Some(p.count as f64),
                threshold_value: Some(min_occurrences as f64),
                affected_resources: p.affected_resources.clone(),
                sample_log_indices: p.sample_indices.clone(),
                timestamp: p.first_seen,
            })
            .collect();

        debug!(
            patterns = analysis.patterns.len(),
            bursts = analysis.bursts.len(),
            confidence = analysis.confidence,
            "pattern pass complete"
        );
        Ok(anomalies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::normalize;
    use serde_json::json;

    fn error_at(message: &str, ts: &str) -> NormalizedLogEntry {
        normalize(&json!({
            "severity": "ERROR",
            "textPayload": message,
            "timestamp": ts
        }))
        .unwrap()
    }

    #[test]
    fn test_numeric_substitution_groups_messages() {
        assert_eq!(
            normalize_message("Connection timeout after 100ms"),
            normalize_message("Connection timeout after 250ms"),
        );
    }

    #[test]
    fn test_normalize_message_placeholders() {
        let n = normalize_message(
            "2025-03-01T12:00:05 req 550e8400-e29b-41d4-a716-446655440000 from 10.0.0.17 failed: 'no route'",
        );
        assert!(n.contains("[TIMESTAMP]"), "{n}");
        assert!(n.contains("[UUID]"), "{n}");
        assert!(n.contains("[IP]"), "{n}");
        assert!(n.contains("[STRING]"), "{n}");
        assert!(!n.contains("550e8400"), "{n}");
    }

    #[test]
    fn test_pattern_needs_three_occurrences() {
        let detector = PatternDetector::new(DetectionThresholds::default());
        let entries = vec![
            error_at("timeout after 100ms", "2025-03-01T12:00:00Z"),
            error_at("timeout after 200ms", "2025-03-01T12:00:10Z"),
        ];
        assert!(detector.analyze_patterns(&entries).patterns.is_empty());

        let mut entries = entries;
        entries.push(error_at("timeout after 300ms", "2025-03-01T12:00:20Z"));
        let analysis = detector.analyze_patterns(&entries);
        assert_eq!(analysis.patterns.len(), 1);
        assert_eq!(analysis.patterns[0].count, 3);
        assert_eq!(analysis.patterns[0].sample_message, "timeout after 100ms");
    }

    #[test]
    fn test_burst_detection_within_window() {
        let detector = PatternDetector::new(DetectionThresholds::default());
        // 6 identical errors inside one 5-minute window.
        let entries: Vec<_> = (0..6)
            .map(|i| error_at("disk write failed", &format!("2025-03-01T12:00:{:02}Z", i * 5)))
            .collect();
        let analysis = detector.analyze_patterns(&entries);
        assert_eq!(analysis.bursts.len(), 1);
        assert_eq!(analysis.bursts[0].count, 6);
        assert_eq!(analysis.bursts[0].severity, AnomalySeverity::Medium);
    }

    #[test]
    fn test_burst_of_ten_is_high_severity() {
        let detector = PatternDetector::new(DetectionThresholds::default());
        let entries: Vec<_> = (0..11)
            .map(|i| error_at("disk write failed", &format!("2025-03-01T12:00:{i:02}Z")))
            .collect();
        let analysis = detector.analyze_patterns(&entries);
        assert_eq!(analysis.bursts[0].severity, AnomalySeverity::High);
    }

    #[test]
    fn test_spread_errors_do_not_burst() {
        let detector = PatternDetector::new(DetectionThresholds::default());
        // Same message but one per 5-minute window.
        let entries: Vec<_> = (0..6)
            .map(|i| error_at("disk write failed", &format!("2025-03-01T{:02}:00:00Z", 6 + i)))
            .collect();
        let analysis = detector.analyze_patterns(&entries);
        assert!(analysis.bursts.is_empty());
        // Still one pattern group across windows.
        assert_eq!(analysis.patterns.len(), 1);
    }

    #[test]
    fn test_pattern_confidence_average() {
        let detector = PatternDetector::new(DetectionThresholds::default());
        // One pattern group of 6 that is also a single-window burst:
        // (1/5 + 1/3) / 2
        let entries: Vec<_> = (0..6)
            .map(|i| error_at("cache miss storm", &format!("2025-03-01T12:01:{i:02}Z")))
            .collect();
        let analysis = detector.analyze_patterns(&entries);
        let expected = (0.2 + 1.0 / 3.0) / 2.0;
        assert!((analysis.confidence - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_detector_emits_repeated_errors_anomaly() {
        let detector = PatternDetector::new(DetectionThresholds::default());
        let entries: Vec<_> = (0..12)
            .map(|i| error_at("oom killed pod 7", &format!("2025-03-01T12:00:{i:02}Z")))
            .collect();
        let window = AnalysisWindow::new(entries, None);
        let anomalies = detector.analyze(&window).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        let a = &anomalies[0];
        assert_eq!(a.kind, AnomalyKind::RepeatedErrors);
        assert_eq!(a.severity, AnomalySeverity::High);
        assert_eq!(a.metric_value, Some(12.0));
        assert!((a.confidence - 1.0).abs() < f64::EPSILON);
    }
}
