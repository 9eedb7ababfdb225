use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, Row, Transaction};
use tracing::{debug, info};

use crate::bronze::types::{
    BronzeRecord, PriorityBucket, ProcessingStatus, SourceDataset,
};
use crate::utils::errors::PipelineError;

const MIGRATIONS: [(i64, &str, &str); 2] = [
    (
        1,
        "create bronze_records",
        "CREATE TABLE IF NOT EXISTS bronze_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL UNIQUE,
            school_slug TEXT NOT NULL,
            capture_timestamp TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            checksum_sha256 TEXT NOT NULL DEFAULT '',
            processing_status TEXT NOT NULL,
            source_dataset TEXT NOT NULL,
            priority_bucket TEXT NOT NULL,
            processing_errors TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    ),
    (
        2,
        "index bronze_records",
        "CREATE INDEX IF NOT EXISTS idx_bronze_slug ON bronze_records(school_slug);
         CREATE INDEX IF NOT EXISTS idx_bronze_status ON bronze_records(processing_status);
         CREATE INDEX IF NOT EXISTS idx_bronze_dataset ON bronze_records(source_dataset);
         CREATE INDEX IF NOT EXISTS idx_bronze_captured ON bronze_records(capture_timestamp);
         CREATE INDEX IF NOT EXISTS idx_bronze_bucket ON bronze_records(priority_bucket)",
    ),
];

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn conversion_failure(index: usize, err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, err.into())
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<BronzeRecord> {
    let status_raw: String = row.get(6)?;
    let dataset_raw: String = row.get(7)?;
    let bucket_raw: String = row.get(8)?;
    let errors_raw: String = row.get(9)?;
    let captured_raw: String = row.get(3)?;
    let created_raw: String = row.get(10)?;
    let updated_raw: String = row.get(11)?;

    Ok(BronzeRecord {
        id: Some(row.get(0)?),
        file_path: row.get(1)?,
        school_slug: row.get(2)?,
        capture_timestamp: parse_ts(&captured_raw, 3)?,
        file_size: row.get::<_, i64>(4)? as u64,
        checksum_sha256: row.get(5)?,
        processing_status: ProcessingStatus::from_str(&status_raw)
            .map_err(|e| conversion_failure(6, e))?,
        source_dataset: SourceDataset::from_str(&dataset_raw)
            .map_err(|e| conversion_failure(7, e))?,
        priority_bucket: PriorityBucket::from_str(&bucket_raw)
            .map_err(|e| conversion_failure(8, e))?,
        processing_errors: serde_json::from_str(&errors_raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e)))?,
        created_at: parse_ts(&created_raw, 10)?,
        updated_at: parse_ts(&updated_raw, 11)?,
    })
}

const SELECT_COLUMNS: &str = "id, file_path, school_slug, capture_timestamp, file_size, \
     checksum_sha256, processing_status, source_dataset, priority_bucket, \
     processing_errors, created_at, updated_at";

/// Durable, indexed store for bronze metadata. Single writer per process;
/// every access serializes through the connection mutex.
#[derive(Debug, Clone)]
pub struct BronzeStore {
    conn: Arc<Mutex<Connection>>,
}

impl BronzeStore {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn)
    }

    /// In-memory mode for tests.
    pub fn open_in_memory() -> Result<Self, PipelineError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, PipelineError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.apply_migrations()?;
        Ok(store)
    }

    fn apply_migrations(&self) -> Result<(), PipelineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )?;
        for (version, description, sql) in MIGRATIONS {
            let applied: bool = conn
                .query_row(
                    "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
                    params![version],
                    |row| row.get::<_, i64>(0),
                )
                .map(|n| n > 0)?;
            if !applied {
                conn.execute_batch(sql)?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                    params![version, description, format_ts(&Utc::now())],
                )?;
                info!("📦 [BRONZE-STORE] applied migration {}: {}", version, description);
            }
        }
        Ok(())
    }

    /// Insert a new record; fails on `file_path` uniqueness violation.
    pub fn insert(&self, record: &BronzeRecord) -> Result<BronzeRecord, PipelineError> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bronze_records (
                file_path, school_slug, capture_timestamp, file_size, checksum_sha256,
                processing_status, source_dataset, priority_bucket, processing_errors,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.file_path,
                record.school_slug,
                format_ts(&record.capture_timestamp),
                record.file_size as i64,
                record.checksum_sha256,
                record.processing_status.as_str(),
                record.source_dataset.as_str(),
                record.priority_bucket.as_str(),
                serde_json::to_string(&record.processing_errors)?,
                format_ts(&now),
                format_ts(&now),
            ],
        )?;

        let mut inserted = record.clone();
        inserted.id = Some(conn.last_insert_rowid());
        inserted.created_at = now;
        inserted.updated_at = now;
        debug!(
            "📥 [BRONZE-STORE] inserted record {} for {}",
            conn.last_insert_rowid(),
            record.file_path
        );
        Ok(inserted)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<BronzeRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM bronze_records WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], map_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_by_path(&self, file_path: &str) -> Result<Option<BronzeRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM bronze_records WHERE file_path = ?1"
        ))?;
        let mut rows = stmt.query_map(params![file_path], map_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_by_slug(&self, school_slug: &str) -> Result<Vec<BronzeRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM bronze_records WHERE school_slug = ?1 ORDER BY capture_timestamp DESC"
        ))?;
        let rows = stmt.query_map(params![school_slug], map_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_by_status(&self, status: ProcessingStatus) -> Result<Vec<BronzeRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM bronze_records WHERE processing_status = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![status.as_str()], map_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_all(&self) -> Result<Vec<BronzeRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM bronze_records ORDER BY id"
        ))?;
        let rows = stmt.query_map([], map_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Update a record's status, always advancing `updated_at` strictly past
    /// its previous value. Returns false iff the record does not exist.
    pub fn update_status(
        &self,
        id: i64,
        status: ProcessingStatus,
        errors: Option<&[String]>,
    ) -> Result<bool, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let previous: Option<String> = conn
            .query_row(
                "SELECT updated_at FROM bronze_records WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(previous_raw) = previous else {
            return Ok(false);
        };
        let previous_ts = parse_ts(&previous_raw, 0)?;

        let mut now = Utc::now();
        if now <= previous_ts {
            now = previous_ts + Duration::milliseconds(1);
        }

        let changed = match errors {
            Some(errors) => conn.execute(
                "UPDATE bronze_records SET processing_status = ?1, processing_errors = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), serde_json::to_string(errors)?, format_ts(&now), id],
            )?,
            None => conn.execute(
                "UPDATE bronze_records SET processing_status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), format_ts(&now), id],
            )?,
        };
        Ok(changed > 0)
    }

    pub fn get_count_by_status(&self) -> Result<HashMap<ProcessingStatus, u64>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut counts: HashMap<ProcessingStatus, u64> =
            ProcessingStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut stmt = conn
            .prepare("SELECT processing_status, COUNT(*) FROM bronze_records GROUP BY processing_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (raw, count) = row?;
            if let Ok(status) = ProcessingStatus::from_str(&raw) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    pub fn get_count_by_dataset(&self) -> Result<HashMap<SourceDataset, u64>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut counts: HashMap<SourceDataset, u64> =
            SourceDataset::ALL.iter().map(|s| (*s, 0)).collect();
        let mut stmt = conn
            .prepare("SELECT source_dataset, COUNT(*) FROM bronze_records GROUP BY source_dataset")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (raw, count) = row?;
            if let Ok(dataset) = SourceDataset::from_str(&raw) {
                counts.insert(dataset, count as u64);
            }
        }
        Ok(counts)
    }

    pub fn get_count_by_priority(&self) -> Result<HashMap<PriorityBucket, u64>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut counts: HashMap<PriorityBucket, u64> =
            PriorityBucket::ALL.iter().map(|b| (*b, 0)).collect();
        let mut stmt = conn
            .prepare("SELECT priority_bucket, COUNT(*) FROM bronze_records GROUP BY priority_bucket")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (raw, count) = row?;
            if let Ok(bucket) = PriorityBucket::from_str(&raw) {
                counts.insert(bucket, count as u64);
            }
        }
        Ok(counts)
    }

    pub fn get_total_count(&self) -> Result<u64, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM bronze_records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn get_average_file_size(&self) -> Result<f64, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let avg: Option<f64> =
            conn.query_row("SELECT AVG(file_size) FROM bronze_records", [], |row| row.get(0))?;
        Ok(avg.unwrap_or(0.0))
    }

    /// Remove a record so its file can be re-registered; used by recovery
    /// before re-running ingestion over a failed path.
    pub fn delete_by_path(&self, file_path: &str) -> Result<bool, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM bronze_records WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(changed > 0)
    }

    /// Set the priority bucket assigned during silver processing.
    pub fn update_priority_bucket(
        &self,
        id: i64,
        bucket: PriorityBucket,
    ) -> Result<bool, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE bronze_records SET priority_bucket = ?1 WHERE id = ?2",
            params![bucket.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    /// Execute `thunk` atomically.
    pub fn transaction<F, R>(&self, thunk: F) -> Result<R, PipelineError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, PipelineError>,
    {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let result = thunk(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bronze::types::IngestErrorKind;

    fn sample_record(path: &str, slug: &str) -> BronzeRecord {
        BronzeRecord {
            id: None,
            file_path: path.to_string(),
            school_slug: slug.to_string(),
            capture_timestamp: "2025-08-21T06:13:41Z".parse().unwrap(),
            file_size: 4096,
            checksum_sha256: String::new(),
            processing_status: ProcessingStatus::Pending,
            source_dataset: SourceDataset::Other,
            priority_bucket: PriorityBucket::Unknown,
            processing_errors: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_then_get_by_path_round_trips() {
        let store = BronzeStore::open_in_memory().unwrap();
        let record = sample_record("/captures/acme-high-1234/docker_curl_20250821_061341.html", "acme-high-1234");
        let inserted = store.insert(&record).unwrap();
        assert!(inserted.id.is_some());

        let fetched = store.get_by_path(&record.file_path).unwrap().unwrap();
        assert_eq!(fetched.id, inserted.id);
        assert_eq!(fetched.school_slug, "acme-high-1234");
        assert_eq!(fetched.capture_timestamp, record.capture_timestamp);
        assert_eq!(fetched.file_size, 4096);
        assert_eq!(fetched.processing_status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_duplicate_path_insert_fails() {
        let store = BronzeStore::open_in_memory().unwrap();
        let record = sample_record("/c/a/docker_curl_20250821_061341.html", "a");
        store.insert(&record).unwrap();

        let err = store.insert(&record).unwrap_err();
        assert_eq!(
            IngestErrorKind::classify_message(&err.to_string()),
            IngestErrorKind::DuplicateSlug
        );
    }

    #[test]
    fn test_update_status_strictly_advances_updated_at() {
        let store = BronzeStore::open_in_memory().unwrap();
        let inserted = store
            .insert(&sample_record("/c/b/docker_curl_20250821_061341.html", "b"))
            .unwrap();
        let id = inserted.id.unwrap();

        let before = store.get_by_id(id).unwrap().unwrap().updated_at;
        assert!(store.update_status(id, ProcessingStatus::Processing, None).unwrap());
        let mid = store.get_by_id(id).unwrap().unwrap();
        assert!(mid.updated_at > before);
        assert_eq!(mid.processing_status, ProcessingStatus::Processing);

        // Immediate second update within the same clock millisecond still advances.
        assert!(store.update_status(id, ProcessingStatus::Processed, None).unwrap());
        let after = store.get_by_id(id).unwrap().unwrap();
        assert!(after.updated_at > mid.updated_at);
    }

    #[test]
    fn test_update_status_returns_false_for_missing_record() {
        let store = BronzeStore::open_in_memory().unwrap();
        assert!(!store.update_status(999, ProcessingStatus::Failed, None).unwrap());
    }

    #[test]
    fn test_update_status_persists_errors() {
        let store = BronzeStore::open_in_memory().unwrap();
        let inserted = store
            .insert(&sample_record("/c/e/docker_curl_20250821_061341.html", "e"))
            .unwrap();
        let id = inserted.id.unwrap();

        let errors = vec!["file_not_found: stat failed".to_string()];
        store
            .update_status(id, ProcessingStatus::Failed, Some(&errors))
            .unwrap();
        let fetched = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(fetched.processing_errors, errors);
    }

    #[test]
    fn test_aggregates() {
        let store = BronzeStore::open_in_memory().unwrap();
        let mut quarantined = sample_record("/c/q/docker_curl_20250821_061341.html", "q");
        quarantined.processing_status = ProcessingStatus::Quarantined;
        quarantined.file_size = 2048;
        store.insert(&sample_record("/c/p/docker_curl_20250821_061341.html", "p")).unwrap();
        store.insert(&quarantined).unwrap();

        let by_status = store.get_count_by_status().unwrap();
        assert_eq!(by_status[&ProcessingStatus::Pending], 1);
        assert_eq!(by_status[&ProcessingStatus::Quarantined], 1);
        assert_eq!(by_status[&ProcessingStatus::Failed], 0);

        assert_eq!(store.get_total_count().unwrap(), 2);
        assert!((store.get_average_file_size().unwrap() - 3072.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = BronzeStore::open_in_memory().unwrap();
        let result: Result<(), PipelineError> = store.transaction(|tx| {
            tx.execute(
                "INSERT INTO bronze_records (
                    file_path, school_slug, capture_timestamp, file_size, checksum_sha256,
                    processing_status, source_dataset, priority_bucket, processing_errors,
                    created_at, updated_at
                ) VALUES ('/t', 't', '2025-01-01T00:00:00.000Z', 1, '', 'pending', 'OTHER',
                          'unknown', '[]', '2025-01-01T00:00:00.000Z', '2025-01-01T00:00:00.000Z')",
                [],
            )?;
            Err(PipelineError::Config("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.get_total_count().unwrap(), 0);
    }
}
