//! Monitoring service: the composition root that owns the store, rule
//! engine, detectors, thresholds, cooldown state, and the periodic
//! analysis cycle.

pub mod alerts;
pub mod cooldown;

pub use alerts::{AlertLog, AlertRecord};
pub use cooldown::CooldownTracker;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::detect::correlation::{CorrelationPolicy, HybridDetector};
use crate::detect::metrics::{self, BaselineMetrics};
use crate::detect::pattern::PatternDetector;
use crate::detect::statistical::StatisticalDetector;
use crate::detect::{AnalysisWindow, Anomaly, DetectionThresholds, Detector, ThresholdUpdate};
use crate::ingest::{IngestFormat, IngestionResult, IngestionService, NormalizedLogEntry};
use crate::rules::{RuleEngine, RuleMeta};
use crate::store::{IndexedLogStore, Pool};

/// Timing and gating knobs for the analysis loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub analysis_interval_secs: u64,
    /// Below this many logs in the window, a cycle is skipped.
    pub min_logs_for_analysis: usize,
    pub cooldown_minutes: i64,
    /// Pause after a failed cycle before the loop continues.
    pub error_backoff_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            analysis_interval_secs: 60,
            min_logs_for_analysis: 10,
            cooldown_minutes: 30,
            error_backoff_secs: 30,
        }
    }
}

/// Counters exposed to the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub total_logs_processed: usize,
    pub total_anomalies_detected: usize,
    pub total_alerts_recorded: usize,
    pub last_analysis: Option<DateTime<Utc>>,
    pub uptime_start: DateTime<Utc>,
}

/// Outcome of one analysis cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub logs_analyzed: usize,
    pub anomalies_detected: usize,
    pub alerts_recorded: usize,
    pub suppressed_by_cooldown: usize,
    pub skipped: bool,
    pub duration_ms: f64,
}

/// The service consumers call into. All mutable state is owned here and
/// lock-protected; nothing lives at module level.
pub struct MonitorService {
    config: MonitorConfig,
    store: Arc<IndexedLogStore>,
    rules: Arc<RuleEngine>,
    ingestion: IngestionService,
    alerts: AlertLog,
    thresholds: RwLock<DetectionThresholds>,
    baseline: Mutex<Option<BaselineMetrics>>,
    cooldown: Mutex<CooldownTracker>,
    stats: Mutex<MonitorStats>,
    /// Held for the whole cycle so concurrent cycles cannot overlap.
    cycle_guard: tokio::sync::Mutex<()>,
}

impl MonitorService {
    pub fn new(
        pool: Pool,
        capacity: i64,
        rules_dir: impl Into<PathBuf>,
        config: MonitorConfig,
        thresholds: DetectionThresholds,
        policy: CorrelationPolicy,
        failed_log_path: Option<PathBuf>,
    ) -> Arc<Self> {
        let store = Arc::new(IndexedLogStore::new(pool.clone(), capacity));
        let rules = Arc::new(RuleEngine::load(rules_dir));
        let hybrid = Arc::new(HybridDetector::new(rules.clone(), policy));
        let ingestion = IngestionService::new(store.clone(), hybrid, failed_log_path);

        Arc::new(Self {
            config,
            store,
            rules,
            ingestion,
            alerts: AlertLog::new(pool),
            thresholds: RwLock::new(thresholds),
            baseline: Mutex::new(None),
            cooldown: Mutex::new(CooldownTracker::new(config.cooldown_minutes)),
            stats: Mutex::new(MonitorStats {
                total_logs_processed: 0,
                total_anomalies_detected: 0,
                total_alerts_recorded: 0,
                last_analysis: None,
                uptime_start: Utc::now(),
            }),
            cycle_guard: tokio::sync::Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Arc<IndexedLogStore> {
        &self.store
    }

    // --- Consumer-facing operations ---

    pub async fn ingest(
        &self,
        body: &str,
        source: &str,
        format: IngestFormat,
    ) -> Result<IngestionResult> {
        self.ingestion.ingest(body, source, format).await
    }

    pub async fn get_logs_range(&self, start: i64, end: i64) -> Result<Vec<NormalizedLogEntry>> {
        self.store.get_range(start, end).await
    }

    pub async fn get_anomalies_range(&self, start: i64, end: i64) -> Result<Vec<i64>> {
        self.store.get_anomaly_indices(start, end).await
    }

    pub async fn get_recent_anomalies(&self, count: usize) -> Result<Vec<i64>> {
        self.store.get_recent_anomalies(count).await
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        self.alerts.list_recent(limit)
    }

    pub fn thresholds(&self) -> DetectionThresholds {
        *self.thresholds.read().expect("thresholds lock poisoned")
    }

    /// Apply a partial threshold update. Takes effect on the next
    /// analysis cycle; detectors are re-parameterized per cycle and never
    /// cache stale values.
    pub fn configure_thresholds(&self, update: &ThresholdUpdate) -> Result<DetectionThresholds> {
        let mut thresholds = self.thresholds.write().expect("thresholds lock poisoned");
        let next = thresholds.apply(update)?;
        *thresholds = next;
        info!(?next, "detection thresholds updated");
        Ok(next)
    }

    pub fn reload_rules(&self) -> Result<usize> {
        self.rules.reload()
    }

    pub fn rule_metas(&self) -> Vec<RuleMeta> {
        self.rules.rule_metas()
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }

    // --- Analysis cycle ---

    /// Run one analysis cycle over the current time window. Safe to call
    /// concurrently with the timer loop; cycles serialize on a guard.
    pub async fn run_analysis_once(&self) -> Result<CycleSummary> {
        let _cycle = self.cycle_guard.lock().await;
        let started = Instant::now();

        let thresholds = self.thresholds();
        let cutoff = Utc::now() - ChronoDuration::minutes(thresholds.time_window_minutes);
        let entries = self.store.get_window(cutoff).await?;
        let total = entries.len();

        if total < self.config.min_logs_for_analysis {
            debug!(total, "insufficient logs for analysis, skipping cycle");
            return Ok(CycleSummary {
                logs_analyzed: total,
                anomalies_detected: 0,
                alerts_recorded: 0,
                suppressed_by_cooldown: 0,
                skipped: true,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            });
        }

        info!(total, window_minutes = thresholds.time_window_minutes, "analyzing window");

        let baseline = self.baseline.lock().expect("baseline lock poisoned").clone();
        let window = AnalysisWindow::new(entries, baseline);

        // Detectors are rebuilt from the current thresholds every cycle.
        let detectors: Vec<Box<dyn Detector>> = vec![
            Box::new(StatisticalDetector::new(thresholds)),
            Box::new(PatternDetector::new(thresholds)),
        ];

        let mut anomalies: Vec<Anomaly> = Vec::new();
        for detector in &detectors {
            match detector.analyze(&window).await {
                Ok(mut found) => anomalies.append(&mut found),
                Err(e) => warn!(detector = detector.name(), "detector failed: {e}"),
            }
        }

        for anomaly in &anomalies {
            for index in &anomaly.sample_log_indices {
                if let Err(e) = self.store.flag_anomaly(*index).await {
                    warn!(index, "failed to flag anomalous log: {e}");
                }
            }
        }

        let (alerts_recorded, suppressed) = self.emit_alerts(&anomalies);

        // This window becomes the volume baseline for the next cycle.
        *self.baseline.lock().expect("baseline lock poisoned") =
            Some(metrics::baseline(&window.entries));

        {
            let mut stats = self.stats.lock().expect("stats lock poisoned");
            stats.total_logs_processed += total;
            stats.total_anomalies_detected += anomalies.len();
            stats.total_alerts_recorded += alerts_recorded;
            stats.last_analysis = Some(Utc::now());
        }

        let summary = CycleSummary {
            logs_analyzed: total,
            anomalies_detected: anomalies.len(),
            alerts_recorded,
            suppressed_by_cooldown: suppressed,
            skipped: false,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            anomalies = summary.anomalies_detected,
            alerts = summary.alerts_recorded,
            suppressed = summary.suppressed_by_cooldown,
            "analysis cycle complete"
        );
        Ok(summary)
    }

    fn emit_alerts(&self, anomalies: &[Anomaly]) -> (usize, usize) {
        let now = Utc::now();
        let mut recorded = 0;
        let mut suppressed = 0;
        let mut cooldown = self.cooldown.lock().expect("cooldown lock poisoned");

        for anomaly in anomalies {
            if cooldown.is_on_cooldown(anomaly, now) {
                debug!(kind = anomaly.kind.as_str(), "alert on cooldown, suppressed");
                suppressed += 1;
                continue;
            }
            match self.alerts.record_alert(anomaly) {
                Ok(id) => {
                    info!(
                        %id,
                        kind = anomaly.kind.as_str(),
                        severity = anomaly.severity.as_str(),
                        confidence = anomaly.confidence,
                        "alert recorded: {}",
                        anomaly.description
                    );
                    cooldown.track(anomaly, now);
                    recorded += 1;
                }
                Err(e) => warn!(kind = anomaly.kind.as_str(), "failed to record alert: {e}"),
            }
        }

        (recorded, suppressed)
    }
}

/// Main analysis loop. Runs a cycle on a fixed interval; a failed cycle
/// is logged and retried after a backoff instead of tearing the loop
/// down.
pub async fn run_monitor_loop(service: Arc<MonitorService>) {
    info!(
        interval_secs = service.config.analysis_interval_secs,
        "monitor loop started"
    );
    let mut interval =
        tokio::time::interval(Duration::from_secs(service.config.analysis_interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match service.run_analysis_once().await {
            Ok(summary) if summary.skipped => {}
            Ok(summary) => {
                debug!(
                    logs = summary.logs_analyzed,
                    anomalies = summary.anomalies_detected,
                    "cycle finished in {:.1}ms",
                    summary.duration_ms
                );
            }
            Err(e) => {
                error!("analysis cycle failed: {e:#}");
                tokio::time::sleep(Duration::from_secs(service.config.error_backoff_secs)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_pool;
    use serde_json::json;

    fn service_with_rules(rule_body: Option<&str>) -> (tempfile::TempDir, Arc<MonitorService>) {
        let dir = tempfile::tempdir().unwrap();
        let rules_dir = dir.path().join("rules");
        std::fs::create_dir_all(&rules_dir).unwrap();
        if let Some(body) = rule_body {
            std::fs::write(rules_dir.join("test.rule"), body).unwrap();
        }
        let pool = open_pool(dir.path().join("monitor.db").to_str().unwrap()).unwrap();
        let service = MonitorService::new(
            pool,
            10_000,
            &rules_dir,
            MonitorConfig::default(),
            DetectionThresholds::default(),
            CorrelationPolicy::default(),
            None,
        );
        (dir, service)
    }

    fn batch_json(records: Vec<serde_json::Value>) -> String {
        serde_json::Value::Array(records).to_string()
    }

    #[tokio::test]
    async fn test_cycle_skips_below_min_logs() {
        let (_dir, service) = service_with_rules(None);
        let body = batch_json(
            (0..5)
                .map(|i| json!({"severity": "INFO", "textPayload": format!("m {i}"), "timestamp": Utc::now().to_rfc3339()}))
                .collect(),
        );
        service.ingest(&body, "test", IngestFormat::Auto).await.unwrap();

        let summary = service.run_analysis_once().await.unwrap();
        assert!(summary.skipped);
        assert_eq!(summary.anomalies_detected, 0);
    }

    #[tokio::test]
    async fn test_cycle_detects_and_cooldown_suppresses_repeat() {
        let (_dir, service) = service_with_rules(None);
        let now = Utc::now();
        let mut records = Vec::new();
        for i in 0..40 {
            records.push(json!({
                "severity": if i < 20 { "ERROR" } else { "INFO" },
                "textPayload": format!("request {i} failed with code {}", 500 + i % 3),
                "timestamp": now.to_rfc3339(),
                "resource": {"type": "gce_instance"}
            }));
        }
        let result = service
            .ingest(&batch_json(records), "test", IngestFormat::Auto)
            .await
            .unwrap();
        assert_eq!(result.processed_count, 40);
        assert_eq!(result.failed_count, 0);

        let summary = service.run_analysis_once().await.unwrap();
        assert!(!summary.skipped);
        assert!(summary.anomalies_detected > 0);
        assert!(summary.alerts_recorded > 0);

        // Same window again: every anomaly class is now on cooldown.
        let summary = service.run_analysis_once().await.unwrap();
        assert_eq!(summary.alerts_recorded, 0);
        assert!(summary.suppressed_by_cooldown > 0);

        // Flagged indices are queryable both ways.
        let max = service.store().current_max_index().await.unwrap();
        let flagged = service.get_anomalies_range(1, max).await.unwrap();
        assert!(!flagged.is_empty());
        let recent = service.get_recent_anomalies(5).await.unwrap();
        assert!(!recent.is_empty());
    }

    #[tokio::test]
    async fn test_rule_match_flags_on_ingest() {
        let (_dir, service) = service_with_rules(Some(
            "meta:\n  id = \"auth\"\n  severity = \"HIGH\"\nevents:\n  $jsonPayload.error_code = \"INVALID_PASSWORD\"\n",
        ));
        let body = batch_json(vec![
            json!({"severity": "ERROR", "jsonPayload": {"error_code": "INVALID_PASSWORD"}, "timestamp": Utc::now().to_rfc3339()}),
            json!({"severity": "INFO", "textPayload": "fine", "timestamp": Utc::now().to_rfc3339()}),
        ]);
        service.ingest(&body, "test", IngestFormat::Auto).await.unwrap();

        let flagged = service.get_anomalies_range(1, 10).await.unwrap();
        assert_eq!(flagged, vec![1]);
    }

    #[tokio::test]
    async fn test_configure_thresholds_applies_next_cycle() {
        let (_dir, service) = service_with_rules(None);
        let now = Utc::now();
        // 3% errors: below the default 5% threshold, above a 2% one.
        let mut records = Vec::new();
        for i in 0..100 {
            records.push(json!({
                "severity": if i < 3 { "ERROR" } else { "INFO" },
                "textPayload": format!("msg {i}"),
                "timestamp": now.to_rfc3339()
            }));
        }
        service
            .ingest(&batch_json(records), "test", IngestFormat::Auto)
            .await
            .unwrap();

        let summary = service.run_analysis_once().await.unwrap();
        assert_eq!(summary.anomalies_detected, 0);

        service
            .configure_thresholds(&ThresholdUpdate {
                error_rate_threshold: Some(0.02),
                ..Default::default()
            })
            .unwrap();

        let summary = service.run_analysis_once().await.unwrap();
        assert!(summary.anomalies_detected > 0);
    }

    #[tokio::test]
    async fn test_ingest_partial_failure_accounting() {
        let (_dir, service) = service_with_rules(None);
        let body = format!(
            "{}\nnot json at all\n{}\n\"just a string\"\n",
            json!({"severity": "INFO", "textPayload": "ok", "timestamp": Utc::now().to_rfc3339()}),
            json!({"severity": "INFO", "textPayload": "ok2", "timestamp": Utc::now().to_rfc3339()}),
        );
        let result = service.ingest(&body, "test", IngestFormat::Ndjson).await.unwrap();
        assert_eq!(result.processed_count, 2);
        // One unparseable line, one non-object record.
        assert_eq!(result.failed_count, 2);
        assert_eq!(result.validation_errors.len(), 2);
    }
}
