//! Durable alert log. Cooldown-surviving anomalies are recorded here for
//! the external alerting/reporting layer to drain.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::detect::Anomaly;
use crate::store::Pool;

#[derive(Debug, serde::Serialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub kind: String,
    pub severity: String,
    pub summary: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct AlertLog {
    pool: Pool,
}

impl AlertLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn record_alert(&self, anomaly: &Anomaly) -> Result<Uuid> {
        let conn = self.pool.get()?;
        let id = Uuid::new_v4();
        let details = serde_json::to_string(anomaly)?;

        conn.execute(
            "INSERT INTO alerts (id, kind, severity, summary, details_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                anomaly.kind.as_str(),
                anomaly.severity.as_str(),
                anomaly.description,
                details,
                Utc::now().to_rfc3339()
            ],
        )?;

        Ok(id)
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, severity, summary, details_json, created_at
             FROM alerts ORDER BY created_at DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id_str: String = row.get(0)?;
            let details_str: String = row.get(4)?;
            let created_str: String = row.get(5)?;
            Ok(AlertRecord {
                id: Uuid::parse_str(&id_str).unwrap_or_default(),
                kind: row.get(1)?,
                severity: row.get(2)?,
                summary: row.get(3)?,
                details: serde_json::from_str(&details_str).unwrap_or_default(),
                created_at: DateTime::parse_from_rfc3339(&created_str)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default(),
            })
        })?;

        let mut alerts = Vec::new();
        for r in rows {
            alerts.push(r?);
        }
        Ok(alerts)
    }
}
