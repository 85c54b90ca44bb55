//! SQLite storage layer -- pool, schema, and the indexed log buffer.

pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use crate::ingest::NormalizedLogEntry;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

fn ts_key(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Bounded sliding-window log buffer with durable sequential indices.
///
/// Every stored record gets the next index from `buffer_meta`; once the
/// buffer exceeds capacity the oldest rows are evicted until it fits.
/// Index values are never reused -- only the slot is. All mutations are
/// serialized behind one writer lock so indices stay gap-free under
/// concurrent ingestion.
pub struct IndexedLogStore {
    pool: Pool,
    capacity: i64,
    write_lock: Mutex<()>,
}

impl IndexedLogStore {
    pub fn new(pool: Pool, capacity: i64) -> Self {
        Self {
            pool,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    /// Append a record, assign the next index, and evict past capacity.
    /// Returns the assigned index.
    pub async fn store(&self, entry: &NormalizedLogEntry) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let index: i64 = tx
            .query_row(
                "UPDATE buffer_meta SET max_index = max_index + 1 WHERE id = 0 RETURNING max_index",
                [],
                |row| row.get(0),
            )
            .context("failed to advance buffer index")?;

        // The index lives in the row key, not the serialized entry.
        let mut stored = entry.clone();
        stored.index = None;
        let entry_json = serde_json::to_string(&stored)?;

        tx.execute(
            "INSERT INTO log_entries (idx, ts, entry_json, is_anomaly) VALUES (?1, ?2, ?3, 0)",
            params![index, ts_key(&entry.timestamp), entry_json],
        )?;

        // Evict until the buffer fits, not just once: bursts must not let
        // the window grow past capacity.
        loop {
            let size: i64 = tx.query_row("SELECT COUNT(*) FROM log_entries", [], |row| row.get(0))?;
            if size <= self.capacity {
                break;
            }
            let oldest: i64 = tx.query_row("SELECT MIN(idx) FROM log_entries", [], |row| row.get(0))?;
            tx.execute("DELETE FROM log_entries WHERE idx = ?1", params![oldest])?;
            tx.execute("DELETE FROM anomaly_indices WHERE idx = ?1", params![oldest])?;
        }

        tx.commit()?;
        Ok(index)
    }

    /// Fetch one record by index, re-attaching the index on read.
    pub async fn get(&self, index: i64) -> Result<Option<NormalizedLogEntry>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT entry_json, is_anomaly FROM log_entries WHERE idx = ?1",
                params![index],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        match row {
            Some((json, flagged)) => Ok(Some(rehydrate(index, &json, flagged != 0)?)),
            None => Ok(None),
        }
    }

    /// Inclusive range query; evicted indices are silently skipped.
    pub async fn get_range(&self, start: i64, end: i64) -> Result<Vec<NormalizedLogEntry>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<NormalizedLogEntry>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT idx, entry_json, is_anomaly FROM log_entries
                 WHERE idx BETWEEN ?1 AND ?2 ORDER BY idx ASC",
            )?;
            let rows = stmt.query_map(params![start, end], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut entries = Vec::new();
            for r in rows {
                let (idx, json, flagged) = r?;
                entries.push(rehydrate(idx, &json, flagged != 0)?);
            }
            Ok(entries)
        })
        .await?
    }

    /// All records with a timestamp at or after `cutoff`, oldest first.
    pub async fn get_window(&self, cutoff: DateTime<Utc>) -> Result<Vec<NormalizedLogEntry>> {
        let pool = self.pool.clone();
        let cutoff_key = ts_key(&cutoff);
        tokio::task::spawn_blocking(move || -> Result<Vec<NormalizedLogEntry>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT idx, entry_json, is_anomaly FROM log_entries
                 WHERE ts >= ?1 ORDER BY idx ASC",
            )?;
            let rows = stmt.query_map(params![cutoff_key], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut entries = Vec::new();
            for r in rows {
                let (idx, json, flagged) = r?;
                entries.push(rehydrate(idx, &json, flagged != 0)?);
            }
            Ok(entries)
        })
        .await?
    }

    /// Mark a record anomalous. Idempotent: a second call is a no-op.
    /// Returns false when the record has already been evicted.
    pub async fn flag_anomaly(&self, index: i64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let flagged: Option<i64> = tx
            .query_row(
                "SELECT is_anomaly FROM log_entries WHERE idx = ?1",
                params![index],
                |row| row.get(0),
            )
            .optional()?;

        let Some(flagged) = flagged else {
            return Ok(false);
        };
        if flagged != 0 {
            return Ok(true);
        }

        tx.execute(
            "UPDATE log_entries SET is_anomaly = 1 WHERE idx = ?1",
            params![index],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO anomaly_indices (idx) VALUES (?1)",
            params![index],
        )?;
        tx.execute(
            "INSERT INTO recent_anomalies (idx) VALUES (?1)",
            params![index],
        )?;
        // Keep only the 100 newest entries.
        tx.execute(
            "DELETE FROM recent_anomalies WHERE seq NOT IN
                 (SELECT seq FROM recent_anomalies ORDER BY seq DESC LIMIT 100)",
            [],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Anomalous indices within an inclusive range, ascending.
    pub async fn get_anomaly_indices(&self, start: i64, end: i64) -> Result<Vec<i64>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT idx FROM anomaly_indices WHERE idx BETWEEN ?1 AND ?2 ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map(params![start, end], |row| row.get::<_, i64>(0))?;

        let mut indices = Vec::new();
        for r in rows {
            indices.push(r?);
        }
        Ok(indices)
    }

    /// The most recently flagged indices, newest first.
    pub async fn get_recent_anomalies(&self, count: usize) -> Result<Vec<i64>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT idx FROM recent_anomalies ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![count as i64], |row| row.get::<_, i64>(0))?;

        let mut indices = Vec::new();
        for r in rows {
            indices.push(r?);
        }
        Ok(indices)
    }

    pub async fn current_max_index(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        let max: i64 =
            conn.query_row("SELECT max_index FROM buffer_meta WHERE id = 0", [], |row| row.get(0))?;
        Ok(max)
    }

    /// Number of live records in the buffer.
    pub async fn len(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM log_entries", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn rehydrate(index: i64, json: &str, flagged: bool) -> Result<NormalizedLogEntry> {
    let mut entry: NormalizedLogEntry =
        serde_json::from_str(json).context("corrupt stored log entry")?;
    entry.index = Some(index);
    entry.is_anomaly = flagged;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::normalize;
    use serde_json::json;

    fn test_store(capacity: i64) -> (tempfile::TempDir, IndexedLogStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, IndexedLogStore::new(pool, capacity))
    }

    fn entry(message: &str) -> NormalizedLogEntry {
        normalize(&json!({
            "timestamp": "2025-03-01T12:00:00Z",
            "severity": "INFO",
            "textPayload": message
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_indices_strictly_increasing() {
        let (_dir, store) = test_store(100);
        let mut last = 0;
        for i in 0..20 {
            let idx = store.store(&entry(&format!("log {i}"))).await.unwrap();
            assert_eq!(idx, last + 1);
            last = idx;
        }
        assert_eq!(store.current_max_index().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_eviction_keeps_sliding_window() {
        let (_dir, store) = test_store(10);
        for i in 0..30 {
            store.store(&entry(&format!("log {i}"))).await.unwrap();
        }
        let entries = store.get_range(1, 30).await.unwrap();
        assert_eq!(entries.len(), 10);
        let indices: Vec<i64> = entries.iter().map(|e| e.index.unwrap()).collect();
        assert_eq!(indices, (21..=30).collect::<Vec<i64>>());
        assert_eq!(store.len().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_get_reattaches_index() {
        let (_dir, store) = test_store(10);
        let idx = store.store(&entry("hello")).await.unwrap();
        let fetched = store.get(idx).await.unwrap().unwrap();
        assert_eq!(fetched.index, Some(idx));
        assert_eq!(fetched.message, "hello");
        assert!(store.get(idx + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flag_anomaly_is_idempotent() {
        let (_dir, store) = test_store(10);
        let idx = store.store(&entry("bad")).await.unwrap();

        assert!(store.flag_anomaly(idx).await.unwrap());
        assert!(store.flag_anomaly(idx).await.unwrap());

        let anomalies = store.get_anomaly_indices(1, 100).await.unwrap();
        assert_eq!(anomalies, vec![idx]);
        let recent = store.get_recent_anomalies(10).await.unwrap();
        assert_eq!(recent, vec![idx]);

        let fetched = store.get(idx).await.unwrap().unwrap();
        assert!(fetched.is_anomaly);
    }

    #[tokio::test]
    async fn test_flag_anomaly_missing_record() {
        let (_dir, store) = test_store(10);
        assert!(!store.flag_anomaly(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_eviction_removes_anomaly_index() {
        let (_dir, store) = test_store(5);
        let idx = store.store(&entry("bad")).await.unwrap();
        store.flag_anomaly(idx).await.unwrap();

        for i in 0..5 {
            store.store(&entry(&format!("filler {i}"))).await.unwrap();
        }

        assert!(store.get(idx).await.unwrap().is_none());
        assert!(store.get_anomaly_indices(idx, idx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_anomalies_newest_first() {
        let (_dir, store) = test_store(50);
        let mut flagged = Vec::new();
        for i in 0..5 {
            let idx = store.store(&entry(&format!("bad {i}"))).await.unwrap();
            store.flag_anomaly(idx).await.unwrap();
            flagged.push(idx);
        }
        let recent = store.get_recent_anomalies(3).await.unwrap();
        flagged.reverse();
        assert_eq!(recent, flagged[..3].to_vec());
    }
}
