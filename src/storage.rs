//! Persistence sink.
//!
//! Detection results and batch accounting land in SQLite. Every write is an
//! independent insert; concurrent collector workers serialize through a
//! mutex around the store, and nothing ever read-modify-writes a row.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

/// One persisted vehicle count.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub camera_address: String,
    /// `%Y-%m-%d %H:%M:%S` local time, matching historical rows.
    pub timestamp: String,
    pub car_count: u32,
    pub confidence: f32,
    pub processing_time_secs: f64,
}

/// Terminal state of one batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    Partial,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Completed => "completed",
            BatchStatus::Partial => "partial",
        }
    }
}

/// Accounting row for one collection batch.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchRecord {
    pub batch_timestamp: String,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub duration_secs: f64,
    pub status: BatchStatus,
}

/// Persistence boundary for the collection pipeline.
pub trait DetectionStore: Send {
    fn insert_detection(&mut self, record: &DetectionRecord) -> Result<()>;

    fn insert_batch_status(&mut self, record: &BatchRecord) -> Result<()>;

    /// Timestamp of the most recent batch that completed without failures.
    fn last_batch_timestamp(&mut self) -> Result<Option<String>>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database {db_path}"))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS car_count_history (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              camera_address TEXT NOT NULL,
              timestamp TEXT NOT NULL,
              car_count INTEGER NOT NULL,
              confidence_score REAL,
              processing_time REAL,
              created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_camera_timestamp
            ON car_count_history(camera_address, timestamp);

            CREATE TABLE IF NOT EXISTS processing_status (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              batch_timestamp TEXT NOT NULL,
              cameras_processed INTEGER NOT NULL,
              cameras_failed INTEGER NOT NULL,
              total_cameras INTEGER NOT NULL,
              processing_time REAL,
              status TEXT NOT NULL,
              created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;
        Ok(())
    }
}

impl DetectionStore for SqliteStore {
    fn insert_detection(&mut self, record: &DetectionRecord) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO car_count_history
                (camera_address, timestamp, car_count, confidence_score, processing_time)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.camera_address,
                    record.timestamp,
                    record.car_count,
                    record.confidence as f64,
                    record.processing_time_secs,
                ],
            )
            .with_context(|| format!("insert detection for {}", record.camera_address))?;
        Ok(())
    }

    fn insert_batch_status(&mut self, record: &BatchRecord) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO processing_status
                (batch_timestamp, cameras_processed, cameras_failed, total_cameras,
                 processing_time, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    record.batch_timestamp,
                    record.succeeded as i64,
                    record.failed as i64,
                    record.total as i64,
                    record.duration_secs,
                    record.status.as_str(),
                ],
            )
            .context("insert batch status")?;
        Ok(())
    }

    fn last_batch_timestamp(&mut self) -> Result<Option<String>> {
        let timestamp = self
            .conn
            .query_row(
                "SELECT MAX(batch_timestamp) FROM processing_status WHERE status = 'completed'",
                [],
                |row| row.get::<_, Option<String>>(0),
            )
            .context("query last batch timestamp")?;
        Ok(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.db");
        let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
        (store, dir)
    }

    fn batch(ts: &str, failed: usize, status: BatchStatus) -> BatchRecord {
        BatchRecord {
            batch_timestamp: ts.to_string(),
            succeeded: 10 - failed,
            failed,
            total: 10,
            duration_secs: 12.5,
            status,
        }
    }

    #[test]
    fn round_trips_detection_rows() {
        let (mut store, _dir) = temp_store();
        store
            .insert_detection(&DetectionRecord {
                camera_address: "10 Main St".to_string(),
                timestamp: "2026-08-24 10:00:00".to_string(),
                car_count: 7,
                confidence: 0.81,
                processing_time_secs: 1.4,
            })
            .unwrap();

        let count: i64 = store
            .conn
            .query_row(
                "SELECT car_count FROM car_count_history WHERE camera_address = '10 Main St'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 7);
    }

    #[test]
    fn last_batch_timestamp_ignores_partial_batches() {
        let (mut store, _dir) = temp_store();
        assert_eq!(store.last_batch_timestamp().unwrap(), None);

        store
            .insert_batch_status(&batch("2026-08-24 09:00:00", 0, BatchStatus::Completed))
            .unwrap();
        store
            .insert_batch_status(&batch("2026-08-24 09:15:00", 2, BatchStatus::Partial))
            .unwrap();

        assert_eq!(
            store.last_batch_timestamp().unwrap().as_deref(),
            Some("2026-08-24 09:00:00")
        );
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.db");
        drop(SqliteStore::open(path.to_str().unwrap()).unwrap());
        drop(SqliteStore::open(path.to_str().unwrap()).unwrap());
    }
}
