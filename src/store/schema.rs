//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Source of truth for the next buffer index.
        CREATE TABLE IF NOT EXISTS buffer_meta (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            max_index INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO buffer_meta (id, max_index) VALUES (0, 0);

        -- One row per live buffer slot; idx is the durable log index.
        CREATE TABLE IF NOT EXISTS log_entries (
            idx INTEGER PRIMARY KEY,
            ts TEXT NOT NULL,
            entry_json TEXT NOT NULL,
            is_anomaly INTEGER NOT NULL DEFAULT 0
        );

        -- Ordered set of anomalous indices for range queries.
        CREATE TABLE IF NOT EXISTS anomaly_indices (
            idx INTEGER PRIMARY KEY
        );

        -- Bounded newest-first list of recently flagged indices.
        CREATE TABLE IF NOT EXISTS recent_anomalies (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            idx INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            severity TEXT NOT NULL,
            summary TEXT NOT NULL,
            details_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_log_entries_ts ON log_entries(ts);
        CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);",
    )?;

    Ok(())
}
