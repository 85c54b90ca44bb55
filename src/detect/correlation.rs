//! Correlation of per-log detection signals: merges the rule engine's
//! verdict with an optional model score into one confidence-tagged
//! decision. The scorer side is a hook -- no scorer ships today, but the
//! correlator never changes when one does.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ingest::NormalizedLogEntry;
use crate::rules::{RuleEngine, RuleMeta};

/// Confidence assigned per agreement level. Hybrid confirmation is
/// weighted well above either signal alone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationPolicy {
    pub hybrid_confidence: f64,
    pub single_confidence: f64,
}

impl Default for CorrelationPolicy {
    fn default() -> Self {
        Self {
            hybrid_confidence: 0.9,
            single_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictSource {
    Rule,
    Ml,
    Hybrid,
    None,
}

impl std::fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VerdictSource::Rule => "rule",
            VerdictSource::Ml => "ml",
            VerdictSource::Hybrid => "hybrid",
            VerdictSource::None => "none",
        };
        f.write_str(s)
    }
}

/// Output of a per-log scorer (the ML hook).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerResult {
    pub score: f64,
    pub detail: String,
}

/// Capability seam for per-log scoring models. Implementations must be
/// pure with respect to shared state.
pub trait LogScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Some when the scorer flags the entry as anomalous.
    fn score(&self, entry: &NormalizedLogEntry) -> Option<ScorerResult>;
}

/// One correlated per-log decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedVerdict {
    pub is_anomaly: bool,
    pub confidence: f64,
    pub source: VerdictSource,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rule: Option<RuleMeta>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub score: Option<ScorerResult>,
}

/// Merge the two per-log signals under the given policy.
pub fn correlate(
    policy: &CorrelationPolicy,
    rule: Option<RuleMeta>,
    score: Option<ScorerResult>,
) -> CorrelatedVerdict {
    let (is_anomaly, confidence, source) = match (&rule, &score) {
        (Some(_), Some(_)) => (true, policy.hybrid_confidence, VerdictSource::Hybrid),
        (Some(_), None) => (true, policy.single_confidence, VerdictSource::Rule),
        (None, Some(_)) => (true, policy.single_confidence, VerdictSource::Ml),
        (None, None) => (false, 0.0, VerdictSource::None),
    };
    CorrelatedVerdict {
        is_anomaly,
        confidence,
        source,
        rule,
        score,
    }
}

/// Per-log hybrid detection: rule matching plus the optional scorer,
/// correlated into one verdict.
pub struct HybridDetector {
    rules: Arc<RuleEngine>,
    scorer: Option<Box<dyn LogScorer>>,
    policy: CorrelationPolicy,
}

impl HybridDetector {
    pub fn new(rules: Arc<RuleEngine>, policy: CorrelationPolicy) -> Self {
        Self {
            rules,
            scorer: None,
            policy,
        }
    }

    /// Attach a scoring model to the hybrid path.
    pub fn with_scorer(mut self, scorer: Box<dyn LogScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn detect(&self, entry: &NormalizedLogEntry) -> CorrelatedVerdict {
        let doc = entry.rule_document();
        let rule = self.rules.match_document(&doc).into_iter().next();
        let score = self.scorer.as_ref().and_then(|s| s.score(entry));
        correlate(&self.policy, rule, score)
    }
}
