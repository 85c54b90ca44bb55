//! End-to-end pipeline test: ingestion through detection to alerting,
//! against a real temp database and rules directory.

use chrono::{Duration, Utc};
use serde_json::json;

use logtriage::config::AppConfig;
use logtriage::detect::ThresholdUpdate;
use logtriage::ingest::IngestFormat;

fn test_config(dir: &tempfile::TempDir) -> AppConfig {
    let rules_dir = dir.path().join("rules");
    std::fs::create_dir_all(&rules_dir).unwrap();
    AppConfig {
        db_path: dir.path().join("pipeline.db").to_string_lossy().into_owned(),
        buffer_capacity: 10_000,
        rules_dir: rules_dir.to_string_lossy().into_owned(),
        ..Default::default()
    }
}

/// 600 healthy INFO records at ~200ms, then 100 records whose latency
/// ramps from 2000ms to 4970ms with 30% of them ERROR. The statistical
/// detector must flag both the latency spike and the error-rate spike.
#[tokio::test]
async fn test_latency_ramp_and_error_spike_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let service = logtriage::build_service(&test_config(&dir)).unwrap();

    service
        .configure_thresholds(&ThresholdUpdate {
            latency_threshold_ms: Some(3000.0),
            error_rate_threshold: Some(0.03),
            ..Default::default()
        })
        .unwrap();

    let base = Utc::now() - Duration::seconds(700);
    let mut records = Vec::with_capacity(700);
    for i in 0..600 {
        records.push(json!({
            "timestamp": (base + Duration::seconds(i)).to_rfc3339(),
            "severity": "INFO",
            "resource": {"type": "cloudsql_database"},
            "jsonPayload": {"latency_ms": 200.0},
            "textPayload": format!("Query {i} executed successfully")
        }));
    }
    for i in 0..100i64 {
        let latency = 2000.0 + i as f64 * 30.0;
        records.push(json!({
            "timestamp": (base + Duration::seconds(600 + i)).to_rfc3339(),
            "severity": if i % 10 < 3 { "ERROR" } else { "WARNING" },
            "resource": {"type": "cloudsql_database"},
            "jsonPayload": {"latency_ms": latency},
            "textPayload": format!("Query timeout after {}ms", latency as i64)
        }));
    }

    let body = serde_json::Value::Array(records).to_string();
    let result = service.ingest(&body, "test", IngestFormat::Auto).await.unwrap();
    assert_eq!(result.processed_count, 700);
    assert_eq!(result.failed_count, 0);

    let summary = service.run_analysis_once().await.unwrap();
    assert!(!summary.skipped);
    assert!(summary.anomalies_detected >= 2);

    let alerts = service.recent_alerts(20).unwrap();
    let kinds: Vec<&str> = alerts.iter().map(|a| a.kind.as_str()).collect();
    assert!(kinds.contains(&"HIGH_LATENCY"), "got {kinds:?}");
    assert!(kinds.contains(&"HIGH_ERROR_RATE"), "got {kinds:?}");

    let latency_alert = alerts.iter().find(|a| a.kind == "HIGH_LATENCY").unwrap();
    let p95 = latency_alert.details["metric_value"].as_f64().unwrap();
    assert!(p95 > 3000.0, "p95 was {p95}");

    // Flagged sample logs are queryable through both anomaly surfaces.
    let max = service.store().current_max_index().await.unwrap();
    assert_eq!(max, 700);
    let flagged = service.get_anomalies_range(1, max).await.unwrap();
    assert!(!flagged.is_empty());
    let recent = service.get_recent_anomalies(5).await.unwrap();
    assert!(!recent.is_empty());
    for idx in recent {
        let entry = service.store().get(idx).await.unwrap().unwrap();
        assert!(entry.is_anomaly);
    }
}

/// Rules flag matching records at ingest time, before any analysis cycle
/// runs, and reloading picks up new rule files.
#[tokio::test]
async fn test_rule_path_flags_on_ingest_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    std::fs::write(
        std::path::Path::new(&config.rules_dir).join("auth.rule"),
        "meta:\n  id = \"auth-failures\"\n  severity = \"HIGH\"\nevents:\n  $severity = \"ERROR\"\n  $message contains \"authentication failed\"\n",
    )
    .unwrap();
    let service = logtriage::build_service(&config).unwrap();

    let now = Utc::now().to_rfc3339();
    let body = serde_json::Value::Array(vec![
        json!({"timestamp": now, "severity": "ERROR", "textPayload": "Authentication failed for user 'admin'"}),
        json!({"timestamp": now, "severity": "ERROR", "textPayload": "disk error on sda1"}),
        json!({"timestamp": now, "severity": "INFO", "textPayload": "Authentication failed rehearsal"}),
    ])
    .to_string();
    service.ingest(&body, "test", IngestFormat::Auto).await.unwrap();

    // Only the record matching both events is flagged.
    assert_eq!(service.get_anomalies_range(1, 10).await.unwrap(), vec![1]);

    // A new rule file becomes active after reload.
    std::fs::write(
        std::path::Path::new(&config.rules_dir).join("disk.rule"),
        "meta:\n  id = \"disk-errors\"\nevents:\n  $message contains \"disk error\"\n",
    )
    .unwrap();
    assert_eq!(service.reload_rules().unwrap(), 2);

    let body = json!({"timestamp": Utc::now().to_rfc3339(), "severity": "ERROR", "textPayload": "disk error on sdb2"})
        .to_string();
    service.ingest(&body, "test", IngestFormat::Auto).await.unwrap();
    assert_eq!(service.get_anomalies_range(1, 10).await.unwrap(), vec![1, 4]);
}

/// The simulated workload drives the full pipeline to alerts.
#[tokio::test]
async fn test_simulated_workload_produces_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let service = logtriage::build_service(&test_config(&dir)).unwrap();

    let plan = logtriage::simulate::SimulationPlan::default();
    let records = logtriage::simulate::generate(&plan);
    let body: String = records.iter().map(|r| format!("{r}\n")).collect();

    let result = service.ingest(&body, "simulation", IngestFormat::Ndjson).await.unwrap();
    assert_eq!(result.processed_count, 755);

    // Widen the analysis window to cover the whole simulated span.
    service
        .configure_thresholds(&ThresholdUpdate {
            time_window_minutes: Some(30),
            ..Default::default()
        })
        .unwrap();

    let summary = service.run_analysis_once().await.unwrap();
    assert!(!summary.skipped);
    assert!(summary.anomalies_detected > 0);

    let alerts = service.recent_alerts(20).unwrap();
    let kinds: Vec<&str> = alerts.iter().map(|a| a.kind.as_str()).collect();
    // The auth burst repeats one normalized message far past the pattern
    // threshold, and the exhaustion phase plants 5 indicator logs.
    assert!(kinds.contains(&"REPEATED_ERRORS"), "got {kinds:?}");
    assert!(kinds.contains(&"RESOURCE_EXHAUSTION"), "got {kinds:?}");
}
