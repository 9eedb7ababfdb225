use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use serde::Serialize;
use tracing::{debug, info};

use crate::silver::types::{
    ExtractionStatus, FieldConfidence, SilverRecord, PAYLOAD_FIELDS,
};
use crate::utils::errors::PipelineError;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS silver_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bronze_record_id INTEGER NOT NULL UNIQUE,
    school_slug TEXT NOT NULL,
    source_year INTEGER NOT NULL,
    school_name TEXT,
    nces_id TEXT,
    district_name TEXT,
    county_name TEXT,
    address_street TEXT,
    address_city TEXT,
    address_state TEXT,
    address_zip TEXT,
    phone TEXT,
    website TEXT,
    setting TEXT,
    grades_served TEXT,
    enrollment INTEGER,
    student_teacher_ratio TEXT,
    full_time_teachers INTEGER,
    counselors INTEGER,
    enrollment_grade_9 INTEGER,
    enrollment_grade_10 INTEGER,
    enrollment_grade_11 INTEGER,
    enrollment_grade_12 INTEGER,
    enrollment_male INTEGER,
    enrollment_female INTEGER,
    national_rank INTEGER,
    national_rank_total INTEGER,
    state_rank INTEGER,
    state_rank_total INTEGER,
    district_rank INTEGER,
    district_rank_total INTEGER,
    stem_rank INTEGER,
    charter_rank INTEGER,
    ap_participation_rate REAL,
    ap_pass_rate REAL,
    ap_course_count INTEGER,
    ib_participation_rate REAL,
    math_proficiency REAL,
    reading_proficiency REAL,
    science_proficiency REAL,
    math_proficiency_state_avg REAL,
    reading_proficiency_state_avg REAL,
    science_proficiency_state_avg REAL,
    graduation_rate REAL,
    graduation_rate_state_avg REAL,
    college_readiness_index REAL,
    college_curriculum_breadth_index REAL,
    act_avg REAL,
    sat_avg REAL,
    college_enrollment_rate REAL,
    college_persistence_rate REAL,
    white_pct REAL,
    black_pct REAL,
    hispanic_pct REAL,
    asian_pct REAL,
    american_indian_pct REAL,
    pacific_islander_pct REAL,
    two_or_more_pct REAL,
    minority_enrollment_pct REAL,
    female_pct REAL,
    male_pct REAL,
    economically_disadvantaged_pct REAL,
    free_lunch_pct REAL,
    reduced_lunch_pct REAL,
    free_reduced_lunch_pct REAL,
    ell_pct REAL,
    special_ed_pct REAL,
    school_type TEXT,
    is_charter INTEGER,
    is_magnet INTEGER,
    is_title_i INTEGER,
    math_test_takers INTEGER,
    reading_test_takers INTEGER,
    science_test_takers INTEGER,
    teachers_certified_pct REAL,
    avg_class_size REAL,
    expenditure_per_student REAL,
    extraction_status TEXT NOT NULL,
    extraction_confidence REAL NOT NULL DEFAULT 0,
    field_confidence TEXT NOT NULL DEFAULT '{}',
    processing_errors TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

const CREATE_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_silver_bronze ON silver_records(bronze_record_id);
    CREATE INDEX IF NOT EXISTS idx_silver_slug ON silver_records(school_slug);
    CREATE INDEX IF NOT EXISTS idx_silver_status ON silver_records(extraction_status);
    CREATE INDEX IF NOT EXISTS idx_silver_year ON silver_records(source_year);
    CREATE INDEX IF NOT EXISTS idx_silver_national_rank ON silver_records(national_rank);
    CREATE INDEX IF NOT EXISTS idx_silver_state_rank ON silver_records(state_rank);
    CREATE INDEX IF NOT EXISTS idx_silver_confidence ON silver_records(extraction_confidence)";

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn text(v: &Option<String>) -> Value {
    match v {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

fn int(v: &Option<u32>) -> Value {
    match v {
        Some(n) => Value::Integer(*n as i64),
        None => Value::Null,
    }
}

fn real(v: &Option<f64>) -> Value {
    match v {
        Some(x) => Value::Real(*x),
        None => Value::Null,
    }
}

fn flag(v: &Option<bool>) -> Value {
    match v {
        Some(x) => Value::Integer(*x as i64),
        None => Value::Null,
    }
}

/// Payload column values in `PAYLOAD_FIELDS` order.
fn payload_values(r: &SilverRecord) -> Vec<Value> {
    vec![
        text(&r.school_name),
        text(&r.nces_id),
        text(&r.district_name),
        text(&r.county_name),
        text(&r.address_street),
        text(&r.address_city),
        text(&r.address_state),
        text(&r.address_zip),
        text(&r.phone),
        text(&r.website),
        text(&r.setting),
        text(&r.grades_served),
        int(&r.enrollment),
        text(&r.student_teacher_ratio),
        int(&r.full_time_teachers),
        int(&r.counselors),
        int(&r.enrollment_grade_9),
        int(&r.enrollment_grade_10),
        int(&r.enrollment_grade_11),
        int(&r.enrollment_grade_12),
        int(&r.enrollment_male),
        int(&r.enrollment_female),
        int(&r.national_rank),
        int(&r.national_rank_total),
        int(&r.state_rank),
        int(&r.state_rank_total),
        int(&r.district_rank),
        int(&r.district_rank_total),
        int(&r.stem_rank),
        int(&r.charter_rank),
        real(&r.ap_participation_rate),
        real(&r.ap_pass_rate),
        int(&r.ap_course_count),
        real(&r.ib_participation_rate),
        real(&r.math_proficiency),
        real(&r.reading_proficiency),
        real(&r.science_proficiency),
        real(&r.math_proficiency_state_avg),
        real(&r.reading_proficiency_state_avg),
        real(&r.science_proficiency_state_avg),
        real(&r.graduation_rate),
        real(&r.graduation_rate_state_avg),
        real(&r.college_readiness_index),
        real(&r.college_curriculum_breadth_index),
        real(&r.act_avg),
        real(&r.sat_avg),
        real(&r.college_enrollment_rate),
        real(&r.college_persistence_rate),
        real(&r.white_pct),
        real(&r.black_pct),
        real(&r.hispanic_pct),
        real(&r.asian_pct),
        real(&r.american_indian_pct),
        real(&r.pacific_islander_pct),
        real(&r.two_or_more_pct),
        real(&r.minority_enrollment_pct),
        real(&r.female_pct),
        real(&r.male_pct),
        real(&r.economically_disadvantaged_pct),
        real(&r.free_lunch_pct),
        real(&r.reduced_lunch_pct),
        real(&r.free_reduced_lunch_pct),
        real(&r.ell_pct),
        real(&r.special_ed_pct),
        text(&r.school_type),
        flag(&r.is_charter),
        flag(&r.is_magnet),
        flag(&r.is_title_i),
        int(&r.math_test_takers),
        int(&r.reading_test_takers),
        int(&r.science_test_takers),
        real(&r.teachers_certified_pct),
        real(&r.avg_class_size),
        real(&r.expenditure_per_student),
    ]
}

fn read_payload(row: &Row<'_>, r: &mut SilverRecord) -> rusqlite::Result<()> {
    r.school_name = row.get("school_name")?;
    r.nces_id = row.get("nces_id")?;
    r.district_name = row.get("district_name")?;
    r.county_name = row.get("county_name")?;
    r.address_street = row.get("address_street")?;
    r.address_city = row.get("address_city")?;
    r.address_state = row.get("address_state")?;
    r.address_zip = row.get("address_zip")?;
    r.phone = row.get("phone")?;
    r.website = row.get("website")?;
    r.setting = row.get("setting")?;
    r.grades_served = row.get("grades_served")?;
    r.enrollment = row.get("enrollment")?;
    r.student_teacher_ratio = row.get("student_teacher_ratio")?;
    r.full_time_teachers = row.get("full_time_teachers")?;
    r.counselors = row.get("counselors")?;
    r.enrollment_grade_9 = row.get("enrollment_grade_9")?;
    r.enrollment_grade_10 = row.get("enrollment_grade_10")?;
    r.enrollment_grade_11 = row.get("enrollment_grade_11")?;
    r.enrollment_grade_12 = row.get("enrollment_grade_12")?;
    r.enrollment_male = row.get("enrollment_male")?;
    r.enrollment_female = row.get("enrollment_female")?;
    r.national_rank = row.get("national_rank")?;
    r.national_rank_total = row.get("national_rank_total")?;
    r.state_rank = row.get("state_rank")?;
    r.state_rank_total = row.get("state_rank_total")?;
    r.district_rank = row.get("district_rank")?;
    r.district_rank_total = row.get("district_rank_total")?;
    r.stem_rank = row.get("stem_rank")?;
    r.charter_rank = row.get("charter_rank")?;
    r.ap_participation_rate = row.get("ap_participation_rate")?;
    r.ap_pass_rate = row.get("ap_pass_rate")?;
    r.ap_course_count = row.get("ap_course_count")?;
    r.ib_participation_rate = row.get("ib_participation_rate")?;
    r.math_proficiency = row.get("math_proficiency")?;
    r.reading_proficiency = row.get("reading_proficiency")?;
    r.science_proficiency = row.get("science_proficiency")?;
    r.math_proficiency_state_avg = row.get("math_proficiency_state_avg")?;
    r.reading_proficiency_state_avg = row.get("reading_proficiency_state_avg")?;
    r.science_proficiency_state_avg = row.get("science_proficiency_state_avg")?;
    r.graduation_rate = row.get("graduation_rate")?;
    r.graduation_rate_state_avg = row.get("graduation_rate_state_avg")?;
    r.college_readiness_index = row.get("college_readiness_index")?;
    r.college_curriculum_breadth_index = row.get("college_curriculum_breadth_index")?;
    r.act_avg = row.get("act_avg")?;
    r.sat_avg = row.get("sat_avg")?;
    r.college_enrollment_rate = row.get("college_enrollment_rate")?;
    r.college_persistence_rate = row.get("college_persistence_rate")?;
    r.white_pct = row.get("white_pct")?;
    r.black_pct = row.get("black_pct")?;
    r.hispanic_pct = row.get("hispanic_pct")?;
    r.asian_pct = row.get("asian_pct")?;
    r.american_indian_pct = row.get("american_indian_pct")?;
    r.pacific_islander_pct = row.get("pacific_islander_pct")?;
    r.two_or_more_pct = row.get("two_or_more_pct")?;
    r.minority_enrollment_pct = row.get("minority_enrollment_pct")?;
    r.female_pct = row.get("female_pct")?;
    r.male_pct = row.get("male_pct")?;
    r.economically_disadvantaged_pct = row.get("economically_disadvantaged_pct")?;
    r.free_lunch_pct = row.get("free_lunch_pct")?;
    r.reduced_lunch_pct = row.get("reduced_lunch_pct")?;
    r.free_reduced_lunch_pct = row.get("free_reduced_lunch_pct")?;
    r.ell_pct = row.get("ell_pct")?;
    r.special_ed_pct = row.get("special_ed_pct")?;
    r.school_type = row.get("school_type")?;
    r.is_charter = row.get("is_charter")?;
    r.is_magnet = row.get("is_magnet")?;
    r.is_title_i = row.get("is_title_i")?;
    r.math_test_takers = row.get("math_test_takers")?;
    r.reading_test_takers = row.get("reading_test_takers")?;
    r.science_test_takers = row.get("science_test_takers")?;
    r.teachers_certified_pct = row.get("teachers_certified_pct")?;
    r.avg_class_size = row.get("avg_class_size")?;
    r.expenditure_per_student = row.get("expenditure_per_student")?;
    Ok(())
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<SilverRecord> {
    let mut record = SilverRecord::default();
    record.id = Some(row.get("id")?);
    record.bronze_record_id = row.get("bronze_record_id")?;
    record.school_slug = row.get("school_slug")?;
    record.source_year = row.get("source_year")?;
    read_payload(row, &mut record)?;

    let status_raw: String = row.get("extraction_status")?;
    record.extraction_status = ExtractionStatus::from_str(&status_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
    })?;
    record.extraction_confidence = row.get("extraction_confidence")?;

    let confidence_raw: String = row.get("field_confidence")?;
    record.field_confidence = serde_json::from_str::<FieldConfidence>(&confidence_raw)
        .unwrap_or_default();
    let errors_raw: String = row.get("processing_errors")?;
    record.processing_errors = serde_json::from_str(&errors_raw).unwrap_or_default();

    let created_raw: String = row.get("created_at")?;
    let updated_raw: String = row.get("updated_at")?;
    record.created_at = parse_ts(&created_raw)?;
    record.updated_at = parse_ts(&updated_raw)?;
    Ok(record)
}

fn insert_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        let columns = PAYLOAD_FIELDS.join(", ");
        let placeholders = (0..PAYLOAD_FIELDS.len() + 9)
            .map(|i| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO silver_records (bronze_record_id, school_slug, source_year, {columns}, \
             extraction_status, extraction_confidence, field_confidence, processing_errors, \
             created_at, updated_at) VALUES ({placeholders})"
        )
    })
}

fn update_all_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        let assignments = PAYLOAD_FIELDS
            .iter()
            .map(|field| format!("{field} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE silver_records SET school_slug = ?, source_year = ?, {assignments}, \
             extraction_status = ?, extraction_confidence = ?, field_confidence = ?, \
             processing_errors = ?, updated_at = ? WHERE bronze_record_id = ?"
        )
    })
}

/// Aggregate view over silver records.
#[derive(Debug, Clone, Serialize)]
pub struct SilverStatistics {
    pub total_records: u64,
    pub by_status: HashMap<ExtractionStatus, u64>,
    pub by_source_year: HashMap<i32, u64>,
    /// Count of non-null values per payload field.
    pub field_coverage: BTreeMap<String, u64>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Durable, indexed store for silver records, keyed by record id and by the
/// owning bronze record id.
#[derive(Debug, Clone)]
pub struct SilverStore {
    conn: Arc<Mutex<Connection>>,
}

impl SilverStore {
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
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )?;
        let applied: i64 = conn.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = 1",
            [],
            |row| row.get(0),
        )?;
        if applied == 0 {
            conn.execute_batch(CREATE_TABLE)?;
            conn.execute_batch(CREATE_INDEXES)?;
            conn.execute(
                "INSERT INTO schema_migrations (version, description, applied_at) VALUES (1, 'create silver_records', ?1)",
                [format_ts(&Utc::now())],
            )?;
            info!("📦 [SILVER-STORE] applied migration 1: create silver_records");
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn record_values(record: &SilverRecord, now: &DateTime<Utc>) -> Result<Vec<Value>, PipelineError> {
        let mut values = vec![
            Value::Integer(record.bronze_record_id),
            Value::Text(record.school_slug.clone()),
            Value::Integer(record.source_year as i64),
        ];
        values.extend(payload_values(record));
        values.push(Value::Text(record.extraction_status.as_str().to_string()));
        values.push(Value::Real(record.extraction_confidence));
        values.push(Value::Text(serde_json::to_string(&record.field_confidence)?));
        values.push(Value::Text(serde_json::to_string(&record.processing_errors)?));
        values.push(Value::Text(format_ts(now)));
        values.push(Value::Text(format_ts(now)));
        Ok(values)
    }

    pub fn insert(&self, record: &SilverRecord) -> Result<SilverRecord, PipelineError> {
        let now = Utc::now();
        let values = Self::record_values(record, &now)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(insert_sql(), params_from_iter(values))?;
        let mut inserted = record.clone();
        inserted.id = Some(conn.last_insert_rowid());
        inserted.created_at = now;
        inserted.updated_at = now;
        debug!(
            "📥 [SILVER-STORE] inserted record {} for bronze {}",
            conn.last_insert_rowid(),
            record.bronze_record_id
        );
        Ok(inserted)
    }

    /// Insert many records atomically.
    pub fn insert_batch(&self, records: &[SilverRecord]) -> Result<Vec<i64>, PipelineError> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let values = Self::record_values(record, &now)?;
            tx.execute(insert_sql(), params_from_iter(values))?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Replace an existing record for the same bronze id, or insert a new
    /// one. Reprocessing updates in place.
    pub fn upsert_by_bronze_id(&self, record: &SilverRecord) -> Result<SilverRecord, PipelineError> {
        let existing = self.get_by_bronze_id(record.bronze_record_id)?;
        match existing {
            None => self.insert(record),
            Some(current) => {
                let now = Utc::now();
                let mut values = vec![
                    Value::Text(record.school_slug.clone()),
                    Value::Integer(record.source_year as i64),
                ];
                values.extend(payload_values(record));
                values.push(Value::Text(record.extraction_status.as_str().to_string()));
                values.push(Value::Real(record.extraction_confidence));
                values.push(Value::Text(serde_json::to_string(&record.field_confidence)?));
                values.push(Value::Text(serde_json::to_string(&record.processing_errors)?));
                values.push(Value::Text(format_ts(&now)));
                values.push(Value::Integer(record.bronze_record_id));

                let conn = self.conn.lock().unwrap();
                conn.execute(update_all_sql(), params_from_iter(values))?;
                let mut updated = record.clone();
                updated.id = current.id;
                updated.created_at = current.created_at;
                updated.updated_at = now;
                Ok(updated)
            }
        }
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<SilverRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM silver_records WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], map_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_by_bronze_id(&self, bronze_record_id: i64) -> Result<Option<SilverRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM silver_records WHERE bronze_record_id = ?1")?;
        let mut rows = stmt.query_map([bronze_record_id], map_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_by_slug(&self, school_slug: &str) -> Result<Vec<SilverRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM silver_records WHERE school_slug = ?1 ORDER BY id")?;
        let rows = stmt.query_map([school_slug], map_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_by_status(&self, status: ExtractionStatus) -> Result<Vec<SilverRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM silver_records WHERE extraction_status = ?1 ORDER BY id")?;
        let rows = stmt.query_map([status.as_str()], map_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_all(&self) -> Result<Vec<SilverRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM silver_records ORDER BY id")?;
        let rows = stmt.query_map([], map_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Apply a subset of columns by name. Unknown columns are rejected;
    /// `updated_at` always advances. Returns false iff the record is absent.
    pub fn update_record(
        &self,
        id: i64,
        changes: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool, PipelineError> {
        if changes.is_empty() {
            return Ok(self.get_by_id(id)?.is_some());
        }

        let mut assignments = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        for (column, value) in changes {
            let allowed = PAYLOAD_FIELDS.contains(&column.as_str())
                || column == "extraction_status"
                || column == "extraction_confidence";
            if !allowed {
                return Err(PipelineError::Config(format!(
                    "column '{column}' cannot be updated"
                )));
            }
            assignments.push(format!("{column} = ?"));
            let converted = match value {
                serde_json::Value::Null => Value::Null,
                serde_json::Value::Bool(b) => Value::Integer(*b as i64),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Value::Integer(i)
                    } else {
                        Value::Real(n.as_f64().unwrap_or(0.0))
                    }
                }
                serde_json::Value::String(s) => Value::Text(s.clone()),
                other => {
                    return Err(PipelineError::Config(format!(
                        "unsupported value for column '{column}': {other}"
                    )))
                }
            };
            values.push(converted);
        }
        values.push(Value::Text(format_ts(&Utc::now())));
        values.push(Value::Integer(id));

        let sql = format!(
            "UPDATE silver_records SET {}, updated_at = ? WHERE id = ?",
            assignments.join(", ")
        );
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(&sql, params_from_iter(values))?;
        Ok(changed > 0)
    }

    /// Administrative delete.
    pub fn delete(&self, id: i64) -> Result<bool, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM silver_records WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    pub fn get_total_count(&self) -> Result<u64, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM silver_records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn get_statistics(&self) -> Result<SilverStatistics, PipelineError> {
        let conn = self.conn.lock().unwrap();

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM silver_records", [], |row| row.get(0))?;

        let mut by_status: HashMap<ExtractionStatus, u64> =
            ExtractionStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut stmt = conn.prepare(
            "SELECT extraction_status, COUNT(*) FROM silver_records GROUP BY extraction_status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (raw, count) = row?;
            if let Ok(status) = ExtractionStatus::from_str(&raw) {
                by_status.insert(status, count as u64);
            }
        }

        let mut by_source_year = HashMap::new();
        let mut stmt =
            conn.prepare("SELECT source_year, COUNT(*) FROM silver_records GROUP BY source_year")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (year, count) = row?;
            by_source_year.insert(year, count as u64);
        }

        let coverage_sql = format!(
            "SELECT {} FROM silver_records",
            PAYLOAD_FIELDS
                .iter()
                .map(|field| format!("COUNT({field})"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut field_coverage = BTreeMap::new();
        let counts: Vec<i64> = conn.query_row(&coverage_sql, [], |row| {
            (0..PAYLOAD_FIELDS.len())
                .map(|index| row.get::<_, i64>(index))
                .collect()
        })?;
        for (field, count) in PAYLOAD_FIELDS.iter().zip(counts) {
            field_coverage.insert(field.to_string(), count as u64);
        }

        let last_updated_raw: Option<String> =
            conn.query_row("SELECT MAX(updated_at) FROM silver_records", [], |row| row.get(0))?;
        let last_updated = match last_updated_raw {
            Some(raw) => Some(parse_ts(&raw)?),
            None => None,
        };

        Ok(SilverStatistics {
            total_records: total as u64,
            by_status,
            by_source_year,
            field_coverage,
            last_updated,
        })
    }
}
