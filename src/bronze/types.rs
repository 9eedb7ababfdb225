use std::path::PathBuf;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bronze record lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "processed")]
    Processed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "quarantined")]
    Quarantined,
    #[serde(rename = "skipped")]
    Skipped,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Quarantined => "quarantined",
            ProcessingStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "processed" => Ok(ProcessingStatus::Processed),
            "failed" => Ok(ProcessingStatus::Failed),
            "quarantined" => Ok(ProcessingStatus::Quarantined),
            "skipped" => Ok(ProcessingStatus::Skipped),
            _ => bail!("Invalid processing status: {}", s),
        }
    }

    pub const ALL: [ProcessingStatus; 6] = [
        ProcessingStatus::Pending,
        ProcessingStatus::Processing,
        ProcessingStatus::Processed,
        ProcessingStatus::Failed,
        ProcessingStatus::Quarantined,
        ProcessingStatus::Skipped,
    ];
}

/// Which capture corpus a file came from, inferred from its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceDataset {
    #[serde(rename = "USNEWS_2024")]
    Usnews2024,
    #[serde(rename = "USNEWS_2025")]
    Usnews2025,
    #[serde(rename = "WAYBACK_ARCHIVE")]
    WaybackArchive,
    #[serde(rename = "OTHER")]
    Other,
}

impl SourceDataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDataset::Usnews2024 => "USNEWS_2024",
            SourceDataset::Usnews2025 => "USNEWS_2025",
            SourceDataset::WaybackArchive => "WAYBACK_ARCHIVE",
            SourceDataset::Other => "OTHER",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "USNEWS_2024" => Ok(SourceDataset::Usnews2024),
            "USNEWS_2025" => Ok(SourceDataset::Usnews2025),
            "WAYBACK_ARCHIVE" => Ok(SourceDataset::WaybackArchive),
            "OTHER" => Ok(SourceDataset::Other),
            _ => bail!("Invalid source dataset: {}", s),
        }
    }

    /// Substring scan of the file path, most specific corpus first.
    pub fn classify(file_path: &str) -> Self {
        if file_path.contains("USNEWS_2024") {
            SourceDataset::Usnews2024
        } else if file_path.contains("USNEWS_2025") {
            SourceDataset::Usnews2025
        } else {
            let lowered = file_path.to_lowercase();
            if lowered.contains("wayback") || lowered.contains("archive") {
                SourceDataset::WaybackArchive
            } else {
                SourceDataset::Other
            }
        }
    }

    pub const ALL: [SourceDataset; 4] = [
        SourceDataset::Usnews2024,
        SourceDataset::Usnews2025,
        SourceDataset::WaybackArchive,
        SourceDataset::Other,
    ];
}

/// Ranking-coverage bucket, assigned during silver processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityBucket {
    #[serde(rename = "bucket_1")]
    Bucket1,
    #[serde(rename = "bucket_2")]
    Bucket2,
    #[serde(rename = "bucket_3")]
    Bucket3,
    #[serde(rename = "unknown")]
    Unknown,
}

impl PriorityBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityBucket::Bucket1 => "bucket_1",
            PriorityBucket::Bucket2 => "bucket_2",
            PriorityBucket::Bucket3 => "bucket_3",
            PriorityBucket::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "bucket_1" => Ok(PriorityBucket::Bucket1),
            "bucket_2" => Ok(PriorityBucket::Bucket2),
            "bucket_3" => Ok(PriorityBucket::Bucket3),
            "unknown" => Ok(PriorityBucket::Unknown),
            _ => bail!("Invalid priority bucket: {}", s),
        }
    }

    pub const ALL: [PriorityBucket; 4] = [
        PriorityBucket::Bucket1,
        PriorityBucket::Bucket2,
        PriorityBucket::Bucket3,
        PriorityBucket::Unknown,
    ];
}

/// One registered capture file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BronzeRecord {
    /// Store-assigned; `None` until inserted.
    pub id: Option<i64>,
    pub file_path: String,
    pub school_slug: String,
    pub capture_timestamp: DateTime<Utc>,
    pub file_size: u64,
    /// Lowercase hex, or empty when checksum verification is disabled.
    pub checksum_sha256: String,
    pub processing_status: ProcessingStatus,
    pub source_dataset: SourceDataset,
    pub priority_bucket: PriorityBucket,
    pub processing_errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything learned about a file before it becomes a record.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub file_path: PathBuf,
    pub school_slug: String,
    pub capture_timestamp: Option<DateTime<Utc>>,
    pub file_size: u64,
    pub checksum_sha256: String,
    pub is_valid: bool,
    pub validation_errors: Vec<String>,
    /// Set when the failure came from the filesystem rather than validation.
    pub file_system_error: Option<IngestErrorKind>,
}

/// Classified ingestion failure kinds; recovery policies key on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IngestErrorKind {
    #[serde(rename = "file_not_found")]
    FileNotFound,
    #[serde(rename = "permission_denied")]
    PermissionDenied,
    #[serde(rename = "corrupted_file")]
    CorruptedFile,
    #[serde(rename = "invalid_format")]
    InvalidFormat,
    #[serde(rename = "checksum_mismatch")]
    ChecksumMismatch,
    #[serde(rename = "duplicate_slug")]
    DuplicateSlug,
}

impl IngestErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestErrorKind::FileNotFound => "file_not_found",
            IngestErrorKind::PermissionDenied => "permission_denied",
            IngestErrorKind::CorruptedFile => "corrupted_file",
            IngestErrorKind::InvalidFormat => "invalid_format",
            IngestErrorKind::ChecksumMismatch => "checksum_mismatch",
            IngestErrorKind::DuplicateSlug => "duplicate_slug",
        }
    }

    /// Classify an OS error into the filesystem error family.
    pub fn from_io_error(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IngestErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => IngestErrorKind::PermissionDenied,
            _ => IngestErrorKind::CorruptedFile,
        }
    }

    /// Substring classification of a recorded error message; used by
    /// recovery to group failed records by their primary cause.
    pub fn classify_message(message: &str) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("duplicate") || lowered.contains("unique constraint") {
            IngestErrorKind::DuplicateSlug
        } else if lowered.contains("checksum") {
            IngestErrorKind::ChecksumMismatch
        } else if lowered.contains("not found")
            || lowered.contains("no such file")
            || lowered.contains("enoent")
        {
            IngestErrorKind::FileNotFound
        } else if lowered.contains("permission") || lowered.contains("eacces") {
            IngestErrorKind::PermissionDenied
        } else if lowered.contains("timestamp")
            || lowered.contains("slug")
            || lowered.contains("empty")
            || lowered.contains("exceeds")
        {
            IngestErrorKind::InvalidFormat
        } else {
            IngestErrorKind::CorruptedFile
        }
    }
}

/// Per-file ingestion failure, carried in batch results and on records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingError {
    pub file_path: String,
    pub error_type: IngestErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingError {
    pub fn new(file_path: &str, error_type: IngestErrorKind, message: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            error_type,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Rendered form stored on records; `classify_message` can recover the
    /// kind from it.
    pub fn render(&self) -> String {
        format!("{}: {}", self.error_type.as_str(), self.message)
    }
}

/// Aggregated outcome of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub correlation_id: String,
    pub total_files: usize,
    pub successful_ingestions: usize,
    pub failed_ingestions: usize,
    pub skipped_files: usize,
    pub errors: Vec<ProcessingError>,
    pub elapsed_ms: u64,
}

impl BatchResult {
    pub fn empty(batch_id: String, correlation_id: String) -> Self {
        Self {
            batch_id,
            correlation_id,
            total_files: 0,
            successful_ingestions: 0,
            failed_ingestions: 0,
            skipped_files: 0,
            errors: Vec::new(),
            elapsed_ms: 0,
        }
    }
}
