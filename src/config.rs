//! Application configuration. Everything has a compiled-in default; a
//! TOML file overrides the parts it names.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detect::correlation::CorrelationPolicy;
use crate::detect::DetectionThresholds;
use crate::monitor::MonitorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database path.
    pub db_path: String,
    /// Log buffer capacity (records); the store evicts past this.
    pub buffer_capacity: i64,
    /// Directory of `.rule` files.
    pub rules_dir: String,
    /// Optional JSONL sink for records that fail normalization.
    pub failed_log_path: Option<String>,
    pub monitor: MonitorConfig,
    pub thresholds: DetectionThresholds,
    pub correlation: CorrelationPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "data/logtriage.db".into(),
            buffer_capacity: 1000,
            rules_dir: "rules".into(),
            failed_log_path: None,
            monitor: MonitorConfig::default(),
            thresholds: DetectionThresholds::default(),
            correlation: CorrelationPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.thresholds.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
