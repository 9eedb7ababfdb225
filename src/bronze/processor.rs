use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::breaker::{BreakerMetrics, CircuitBreaker, CircuitBreakerManager};
use crate::bronze::store::BronzeStore;
use crate::bronze::types::{
    BatchResult, BronzeRecord, FileMetadata, IngestErrorKind, PriorityBucket, ProcessingError,
    ProcessingStatus, SourceDataset,
};
use crate::config::{BreakerProfiles, BronzeConfig};
use crate::utils::errors::PipelineError;
use crate::utils::logger::{generate_correlation_id, Logger};

/// Directory names never descended into during discovery.
const EXCLUDED_DIRS: [&str; 4] = ["node_modules", "target", "__pycache__", "venv"];

fn capture_timestamp_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"docker_curl_(\d{8})_(\d{6})\.html$").expect("capture timestamp pattern")
    })
}

/// Parse `docker_curl_YYYYMMDD_HHMMSS.html` into a UTC instant.
pub fn parse_capture_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    let captures = capture_timestamp_pattern().captures(file_name)?;
    let date = NaiveDate::parse_from_str(captures.get(1)?.as_str(), "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(captures.get(2)?.as_str(), "%H%M%S").ok()?;
    Some(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)))
}

fn is_capture_file(file_name: &str) -> bool {
    file_name.starts_with("docker_curl_") && file_name.ends_with(".html")
}

fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir).follow_links(false).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !name.starts_with('.') && !EXCLUDED_DIRS.contains(&name.as_ref())
    });

    for entry in walker {
        let entry = entry.map_err(|err| match err.into_io_error() {
            Some(io) => PipelineError::FileSystem(io),
            None => PipelineError::Extraction("directory walk failed".to_string()),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if is_capture_file(&entry.file_name().to_string_lossy()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

enum FileOutcome {
    Ingested,
    Failed(ProcessingError),
    Skipped,
}

/// Discovers capture files, extracts and validates their metadata, and
/// registers them as bronze records. Individual file failures never abort a
/// batch; the only fatal condition is invalid configuration.
pub struct BronzeFileProcessor {
    config: BronzeConfig,
    breakers: Arc<CircuitBreakerManager>,
    scan_breaker: Arc<CircuitBreaker>,
    stat_breaker: Arc<CircuitBreaker>,
    read_breaker: Arc<CircuitBreaker>,
    insert_breaker: Arc<CircuitBreaker>,
    logger: Logger,
}

impl BronzeFileProcessor {
    pub fn new(
        config: BronzeConfig,
        profiles: &BreakerProfiles,
        breakers: Arc<CircuitBreakerManager>,
    ) -> Self {
        let scan_breaker = breakers.register("fs_scan", profiles.external_drive.clone());
        let stat_breaker = breakers.register("fs_stat", profiles.external_drive.clone());
        let read_breaker = breakers.register("fs_read", profiles.external_drive.clone());
        let insert_breaker = breakers.register("bronze_insert", profiles.database.clone());
        let logger = Logger::new().with_context(&[("component", "bronze_processor")]);

        Self {
            config,
            breakers,
            scan_breaker,
            stat_breaker,
            read_breaker,
            insert_breaker,
            logger,
        }
    }

    pub fn config(&self) -> &BronzeConfig {
        &self.config
    }

    pub fn source_directories(&self) -> &[PathBuf] {
        &self.config.source_directories
    }

    /// Fatal-at-startup checks.
    pub fn validate_configuration(&self) -> Result<(), PipelineError> {
        if self.config.source_directories.is_empty() {
            return Err(PipelineError::Config(
                "at least one source directory must be configured".to_string(),
            ));
        }
        if self.config.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be positive".to_string()));
        }
        if self.config.parallel_workers == 0 {
            return Err(PipelineError::Config(
                "parallel_workers must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Recursively scan every configured source directory for capture files.
    /// A directory that fails to scan degrades the run but does not abort it.
    pub async fn discover_files(&self) -> Result<Vec<PathBuf>, PipelineError> {
        self.validate_configuration()?;
        let timer = self.logger.start_timer("discover_files");
        let mut discovered = Vec::new();

        for dir in &self.config.source_directories {
            let dir = dir.clone();
            let outcome = self
                .scan_breaker
                .execute(|| {
                    let dir = dir.clone();
                    async move {
                        tokio::task::spawn_blocking(move || scan_directory(&dir))
                            .await
                            .map_err(|e| {
                                PipelineError::Extraction(format!("scan task aborted: {e}"))
                            })?
                    }
                })
                .await;

            match outcome.data {
                Some(files) => {
                    debug!(
                        "📁 [BRONZE] discovered {} capture files under {}",
                        files.len(),
                        dir.display()
                    );
                    discovered.extend(files);
                }
                None => warn!(
                    "⚠️ [BRONZE] scan failed for {}: {}",
                    dir.display(),
                    outcome.error.unwrap_or_default()
                ),
            }
        }

        timer.end(Some("discovery completed"));
        info!("📁 [BRONZE] discovery found {} capture files", discovered.len());
        Ok(discovered)
    }

    /// Stat, validate, and fingerprint one file. Never errors; reasons
    /// accumulate on the returned metadata.
    pub async fn extract_metadata(&self, path: &Path) -> FileMetadata {
        let mut validation_errors = Vec::new();
        let mut file_system_error = None;

        let stat_path = path.to_path_buf();
        let stat = self
            .stat_breaker
            .execute(|| {
                let p = stat_path.clone();
                async move { tokio::fs::metadata(&p).await.map_err(PipelineError::from) }
            })
            .await;

        let file_size = match stat.data {
            Some(meta) => meta.len(),
            None => {
                let message = stat.error.unwrap_or_else(|| "stat failed".to_string());
                file_system_error = Some(IngestErrorKind::classify_message(&message));
                validation_errors.push(format!("Unable to stat file: {message}"));
                0
            }
        };

        let school_slug = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        if school_slug.is_empty() || school_slug == "." {
            validation_errors.push("Unable to determine school slug from path".to_string());
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        let capture_timestamp = parse_capture_timestamp(&file_name);
        if capture_timestamp.is_none() {
            validation_errors.push("Unable to parse timestamp from filename".to_string());
        }

        if file_system_error.is_none() {
            if file_size == 0 {
                validation_errors.push("file is empty".to_string());
            } else if file_size > self.config.max_file_size {
                validation_errors.push(format!(
                    "file size {} exceeds maximum {}",
                    file_size, self.config.max_file_size
                ));
            }
        }

        let mut checksum_sha256 = String::new();
        if self.config.checksum_verification && file_system_error.is_none() && file_size > 0 {
            let read_path = path.to_path_buf();
            let read = self
                .read_breaker
                .execute(|| {
                    let p = read_path.clone();
                    async move { tokio::fs::read(&p).await.map_err(PipelineError::from) }
                })
                .await;
            match read.data {
                Some(content) => {
                    let mut hasher = Sha256::new();
                    hasher.update(&content);
                    checksum_sha256 = format!("{:x}", hasher.finalize());
                }
                None => validation_errors.push(format!(
                    "checksum read failed: {}",
                    read.error.unwrap_or_default()
                )),
            }
        }

        let is_valid = validation_errors.is_empty();
        FileMetadata {
            file_path: path.to_path_buf(),
            school_slug,
            capture_timestamp,
            file_size,
            checksum_sha256,
            is_valid,
            validation_errors,
            file_system_error,
        }
    }

    fn build_record(&self, metadata: &FileMetadata) -> BronzeRecord {
        let file_path = metadata.file_path.to_string_lossy().to_string();
        let now = Utc::now();
        BronzeRecord {
            id: None,
            file_path: file_path.clone(),
            school_slug: metadata.school_slug.clone(),
            // Registration time stands in when the filename carried no timestamp.
            capture_timestamp: metadata.capture_timestamp.unwrap_or(now),
            file_size: metadata.file_size,
            checksum_sha256: metadata.checksum_sha256.clone(),
            processing_status: if metadata.is_valid {
                ProcessingStatus::Pending
            } else {
                ProcessingStatus::Quarantined
            },
            source_dataset: SourceDataset::classify(&file_path),
            priority_bucket: PriorityBucket::Unknown,
            processing_errors: metadata.validation_errors.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn classify_invalid(&self, metadata: &FileMetadata) -> IngestErrorKind {
        if let Some(kind) = metadata.file_system_error {
            return kind;
        }
        if metadata
            .validation_errors
            .iter()
            .any(|e| e.to_lowercase().contains("checksum"))
        {
            return IngestErrorKind::ChecksumMismatch;
        }
        IngestErrorKind::InvalidFormat
    }

    async fn insert_record(
        &self,
        record: BronzeRecord,
        store: &BronzeStore,
    ) -> Result<BronzeRecord, String> {
        let store = store.clone();
        let outcome = self
            .insert_breaker
            .execute(|| {
                let store = store.clone();
                let record = record.clone();
                async move {
                    tokio::task::spawn_blocking(move || store.insert(&record))
                        .await
                        .map_err(|e| PipelineError::Extraction(format!("insert task aborted: {e}")))?
                }
            })
            .await;
        match outcome.data {
            Some(inserted) => Ok(inserted),
            None => Err(outcome.error.unwrap_or_else(|| "insert failed".to_string())),
        }
    }

    async fn process_single(&self, path: &Path, store: Option<&BronzeStore>) -> FileOutcome {
        let metadata = self.extract_metadata(path).await;
        let file_path = metadata.file_path.to_string_lossy().to_string();

        if metadata.is_valid {
            let record = self.build_record(&metadata);
            if let Some(store) = store {
                if let Err(message) = self.insert_record(record, store).await {
                    let kind = IngestErrorKind::classify_message(&message);
                    return FileOutcome::Failed(ProcessingError::new(&file_path, kind, &message));
                }
            }
            return FileOutcome::Ingested;
        }

        if !self.config.auto_quarantine {
            debug!("⏭️ [BRONZE] skipping invalid file (quarantine disabled): {}", file_path);
            return FileOutcome::Skipped;
        }

        let kind = self.classify_invalid(&metadata);
        let record = self.build_record(&metadata);
        if let Some(store) = store {
            if let Err(message) = self.insert_record(record, store).await {
                let kind = IngestErrorKind::classify_message(&message);
                return FileOutcome::Failed(ProcessingError::new(&file_path, kind, &message));
            }
        }
        let reason = metadata
            .validation_errors
            .first()
            .cloned()
            .unwrap_or_else(|| "validation failed".to_string());
        FileOutcome::Failed(ProcessingError::new(&file_path, kind, &reason))
    }

    /// Process `paths` in worker-sized chunks; within a chunk all files run
    /// concurrently and every outcome is awaited before the next chunk.
    pub async fn process_batch(
        &self,
        paths: &[PathBuf],
        store: Option<&BronzeStore>,
        correlation_id: Option<String>,
        batch_id: Option<String>,
    ) -> Result<BatchResult, PipelineError> {
        self.validate_configuration()?;

        let correlation_id = correlation_id.unwrap_or_else(generate_correlation_id);
        let batch_id = batch_id.unwrap_or_else(|| format!("batch-{}", Uuid::new_v4()));
        let logger = self
            .logger
            .with_context(&[("correlation_id", &correlation_id), ("batch_id", &batch_id)]);
        let started = Instant::now();

        let mut result = BatchResult::empty(batch_id, correlation_id);
        result.total_files = paths.len();
        logger.info(&format!("processing batch of {} files", paths.len()));

        for chunk in paths.chunks(self.config.parallel_workers.max(1)) {
            let outcomes =
                futures::future::join_all(chunk.iter().map(|p| self.process_single(p, store)))
                    .await;
            for outcome in outcomes {
                match outcome {
                    FileOutcome::Ingested => result.successful_ingestions += 1,
                    FileOutcome::Skipped => result.skipped_files += 1,
                    FileOutcome::Failed(error) => {
                        result.failed_ingestions += 1;
                        result.errors.push(error);
                    }
                }
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "📊 [BRONZE] batch {} done: {} ok, {} failed, {} skipped in {}ms",
            result.batch_id,
            result.successful_ingestions,
            result.failed_ingestions,
            result.skipped_files,
            result.elapsed_ms
        );
        Ok(result)
    }

    /// Discovery followed by batch processing, split by the configured
    /// batch size.
    pub async fn process_all_files(
        &self,
        store: Option<&BronzeStore>,
        correlation_id: Option<String>,
    ) -> Result<BatchResult, PipelineError> {
        let correlation_id = correlation_id.unwrap_or_else(generate_correlation_id);
        let paths = self.discover_files().await?;

        let mut combined = BatchResult::empty(
            format!("run-{}", Uuid::new_v4()),
            correlation_id.clone(),
        );
        let started = Instant::now();

        for batch in paths.chunks(self.config.batch_size.max(1)) {
            let result = self
                .process_batch(batch, store, Some(correlation_id.clone()), None)
                .await?;
            combined.total_files += result.total_files;
            combined.successful_ingestions += result.successful_ingestions;
            combined.failed_ingestions += result.failed_ingestions;
            combined.skipped_files += result.skipped_files;
            combined.errors.extend(result.errors);
        }

        combined.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(combined)
    }

    pub fn get_circuit_breaker_metrics(&self) -> std::collections::HashMap<String, BreakerMetrics> {
        self.breakers.get_all_metrics()
    }

    pub fn reset_circuit_breakers(&self) {
        for breaker in [
            &self.scan_breaker,
            &self.stat_breaker,
            &self.read_breaker,
            &self.insert_breaker,
        ] {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use std::io::Write;

    fn test_processor(dirs: Vec<PathBuf>) -> BronzeFileProcessor {
        let config = BronzeConfig {
            source_directories: dirs,
            ..BronzeConfig::default()
        };
        BronzeFileProcessor::new(
            config,
            &BreakerProfiles::default(),
            Arc::new(CircuitBreakerManager::new()),
        )
    }

    fn write_capture(dir: &Path, slug: &str, name: &str, content: &[u8]) -> PathBuf {
        let school_dir = dir.join(slug);
        std::fs::create_dir_all(&school_dir).unwrap();
        let path = school_dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_parse_capture_timestamp() {
        let parsed = parse_capture_timestamp("docker_curl_20250821_061341.html").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-08-21T06:13:41+00:00");
        assert!(parse_capture_timestamp("curl_bad.html").is_none());
        assert!(parse_capture_timestamp("docker_curl_2025081_061341.html").is_none());
    }

    #[tokio::test]
    async fn test_discovery_finds_captures_and_prunes_hidden_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let kept = write_capture(
            tmp.path(),
            "westfield-high-school-6921",
            "docker_curl_20250821_061341.html",
            b"<html></html>",
        );
        write_capture(tmp.path(), "other-school-1", "notes.txt", b"x");
        write_capture(tmp.path(), ".hidden/school", "docker_curl_20250821_061341.html", b"x");
        write_capture(tmp.path(), "node_modules/pkg", "docker_curl_20250821_061341.html", b"x");

        let processor = test_processor(vec![tmp.path().to_path_buf()]);
        let discovered = processor.discover_files().await.unwrap();
        assert_eq!(discovered, vec![kept]);
    }

    #[tokio::test]
    async fn test_extract_metadata_happy_path() {
        let tmp = tempfile::tempdir().unwrap();
        let content = vec![b'a'; 4096];
        let path = write_capture(
            tmp.path(),
            "westfield-high-school-6921",
            "docker_curl_20250821_061341.html",
            &content,
        );

        let processor = test_processor(vec![tmp.path().to_path_buf()]);
        let metadata = processor.extract_metadata(&path).await;

        assert!(metadata.is_valid, "errors: {:?}", metadata.validation_errors);
        assert_eq!(metadata.school_slug, "westfield-high-school-6921");
        assert_eq!(
            metadata.capture_timestamp.unwrap().to_rfc3339(),
            "2025-08-21T06:13:41+00:00"
        );
        assert_eq!(metadata.file_size, 4096);
        assert_eq!(metadata.checksum_sha256.len(), 64);

        let mut hasher = Sha256::new();
        hasher.update(&content);
        assert_eq!(metadata.checksum_sha256, format!("{:x}", hasher.finalize()));
    }

    #[tokio::test]
    async fn test_extract_metadata_bad_filename() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_capture(tmp.path(), "school-x", "curl_bad.html", b"<html></html>");

        let processor = test_processor(vec![tmp.path().to_path_buf()]);
        let metadata = processor.extract_metadata(&path).await;

        assert!(!metadata.is_valid);
        assert!(metadata
            .validation_errors
            .iter()
            .any(|e| e == "Unable to parse timestamp from filename"));
    }

    #[tokio::test]
    async fn test_extract_metadata_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_capture(tmp.path(), "school-y", "docker_curl_20250821_061341.html", b"");

        let processor = test_processor(vec![tmp.path().to_path_buf()]);
        let metadata = processor.extract_metadata(&path).await;

        assert!(!metadata.is_valid);
        assert!(metadata.validation_errors.iter().any(|e| e == "file is empty"));
    }

    #[tokio::test]
    async fn test_process_batch_inserts_pending_record() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_capture(
            tmp.path(),
            "westfield-high-school-6921",
            "docker_curl_20250821_061341.html",
            &vec![b'a'; 4096],
        );

        let processor = test_processor(vec![tmp.path().to_path_buf()]);
        let store = BronzeStore::open_in_memory().unwrap();
        let result = processor
            .process_batch(&[path.clone()], Some(&store), None, None)
            .await
            .unwrap();

        assert_eq!(result.total_files, 1);
        assert_eq!(result.successful_ingestions, 1);
        assert_eq!(result.failed_ingestions, 0);

        let record = store.get_by_path(&path.to_string_lossy()).unwrap().unwrap();
        assert_eq!(record.processing_status, ProcessingStatus::Pending);
        assert_eq!(record.source_dataset, SourceDataset::Other);
        assert_eq!(record.school_slug, "westfield-high-school-6921");
    }

    #[tokio::test]
    async fn test_process_batch_quarantines_invalid_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_capture(tmp.path(), "school-x", "curl_bad.html", b"<html></html>");

        let processor = test_processor(vec![tmp.path().to_path_buf()]);
        let store = BronzeStore::open_in_memory().unwrap();
        let result = processor
            .process_batch(&[path.clone()], Some(&store), None, None)
            .await
            .unwrap();

        assert_eq!(result.total_files, 1);
        assert_eq!(result.successful_ingestions, 0);
        assert_eq!(result.failed_ingestions, 1);
        assert_eq!(result.errors[0].error_type, IngestErrorKind::InvalidFormat);

        let record = store.get_by_path(&path.to_string_lossy()).unwrap().unwrap();
        assert_eq!(record.processing_status, ProcessingStatus::Quarantined);
    }

    #[tokio::test]
    async fn test_duplicate_paths_in_one_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_capture(
            tmp.path(),
            "acme-high-1",
            "docker_curl_20250821_061341.html",
            &vec![b'a'; 128],
        );

        let processor = test_processor(vec![tmp.path().to_path_buf()]);
        let store = BronzeStore::open_in_memory().unwrap();
        let result = processor
            .process_batch(&[path.clone(), path.clone()], Some(&store), None, None)
            .await
            .unwrap();

        assert_eq!(result.successful_ingestions, 1);
        assert_eq!(result.failed_ingestions, 1);
        assert_eq!(result.errors[0].error_type, IngestErrorKind::DuplicateSlug);
        assert_eq!(store.get_total_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_trips_stat_breaker() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = Arc::new(CircuitBreakerManager::new());
        let mut profiles = BreakerProfiles::default();
        profiles.external_drive.failure_threshold = 3;
        profiles.external_drive.max_retries = 0;
        let config = BronzeConfig {
            source_directories: vec![tmp.path().to_path_buf()],
            ..BronzeConfig::default()
        };
        let processor = BronzeFileProcessor::new(config, &profiles, Arc::clone(&manager));

        let ghost = tmp.path().join("gone/docker_curl_20250821_061341.html");
        for _ in 0..3 {
            let metadata = processor.extract_metadata(&ghost).await;
            assert!(!metadata.is_valid);
            assert_eq!(metadata.file_system_error, Some(IngestErrorKind::FileNotFound));
        }

        let stat = manager.get("fs_stat").unwrap();
        assert_eq!(stat.state(), CircuitState::Open);

        // Fourth call fails fast with the open-circuit error.
        let metadata = processor.extract_metadata(&ghost).await;
        assert!(metadata
            .validation_errors
            .iter()
            .any(|e| e.contains("Circuit breaker 'fs_stat' is OPEN")));
    }

    #[tokio::test]
    async fn test_validate_configuration_rejects_empty_sources() {
        let processor = test_processor(Vec::new());
        assert!(matches!(
            processor.validate_configuration(),
            Err(PipelineError::Config(_))
        ));
    }
}
