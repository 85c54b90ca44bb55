//! LogTriage -- appliance-grade anomaly triage for cloud log streams.
//!
//! This crate provides the core pipeline: normalization of heterogeneous
//! log payloads, a bounded indexed buffer over SQLite, a declarative rule
//! engine, statistical/pattern anomaly detection, signal correlation, and
//! cooldown-gated alerting.

pub mod config;
pub mod detect;
pub mod ingest;
pub mod monitor;
pub mod rules;
pub mod simulate;
pub mod store;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::monitor::MonitorService;

/// Wire up the monitoring service from configuration.
pub fn build_service(config: &AppConfig) -> Result<Arc<MonitorService>> {
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::info!(db_path = %config.db_path, "initializing database");
    let pool = store::open_pool(&config.db_path)?;

    Ok(MonitorService::new(
        pool,
        config.buffer_capacity,
        &config.rules_dir,
        config.monitor,
        config.thresholds,
        config.correlation,
        config.failed_log_path.as_ref().map(PathBuf::from),
    ))
}

/// Start the monitor daemon: build the service and run the analysis loop
/// until the process is stopped.
pub async fn run_monitor(config: AppConfig) -> Result<()> {
    let service = build_service(&config)?;
    monitor::run_monitor_loop(service).await;
    Ok(())
}
