use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::SecondsFormat;
use serde::Serialize;
use tracing::{info, warn};

use crate::bronze::processor::BronzeFileProcessor;
use crate::bronze::store::BronzeStore;
use crate::bronze::types::{BronzeRecord, IngestErrorKind, ProcessingStatus};
use crate::utils::errors::PipelineError;
use crate::utils::logger::{generate_correlation_id, Logger};

/// Per-error-kind retry tuning.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_millis() as f64
            * self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((scaled as u64).min(self.max_delay.as_millis() as u64))
    }
}

/// The policy table. `duplicate_slug` gets no retries; duplicates are
/// resolved structurally instead.
pub fn policy_for(kind: IngestErrorKind) -> RetryPolicy {
    match kind {
        IngestErrorKind::FileNotFound => RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        },
        IngestErrorKind::PermissionDenied => RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_secs(10),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(10),
        },
        IngestErrorKind::CorruptedFile => RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(8),
        },
        IngestErrorKind::InvalidFormat => RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(2),
        },
        IngestErrorKind::ChecksumMismatch => RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_secs(3),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(12),
        },
        IngestErrorKind::DuplicateSlug => RetryPolicy {
            max_retries: 0,
            initial_delay: Duration::from_secs(0),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(0),
        },
    }
}

/// Outcome of one `recover_all_failed_records` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub total_attempted: usize,
    pub successful: usize,
    pub still_failed: usize,
    pub skipped: usize,
    pub recovery_time_ms: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriveRecoveryReport {
    pub healthy: bool,
    pub recovered_drives: Vec<String>,
}

/// Rolling counters across recovery invocations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryMetrics {
    pub recovery_attempts: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub average_recovery_time_ms: f64,
    pub error_patterns: HashMap<String, u64>,
}

/// Groups failed bronze records by their primary error kind, applies the
/// per-kind retry policies through the processor, resolves duplicates, and
/// recovers external-volume health.
pub struct ErrorRecovery {
    store: BronzeStore,
    processor: Arc<BronzeFileProcessor>,
    metrics: Arc<RwLock<RecoveryMetrics>>,
    logger: Logger,
}

impl ErrorRecovery {
    pub fn new(store: BronzeStore, processor: Arc<BronzeFileProcessor>) -> Self {
        Self {
            store,
            processor,
            metrics: Arc::new(RwLock::new(RecoveryMetrics::default())),
            logger: Logger::new().with_context(&[("component", "error_recovery")]),
        }
    }

    pub fn get_metrics(&self) -> RecoveryMetrics {
        self.metrics.read().unwrap().clone()
    }

    /// Primary error kind of a record, inferred from its first recorded
    /// processing error.
    fn primary_error_kind(record: &BronzeRecord) -> IngestErrorKind {
        record
            .processing_errors
            .first()
            .map(|message| IngestErrorKind::classify_message(message))
            .unwrap_or(IngestErrorKind::InvalidFormat)
    }

    /// Retry one record under its policy. The failed row is cleared first
    /// so re-ingestion can register the file afresh.
    async fn retry_record(
        &self,
        record: &BronzeRecord,
        policy: &RetryPolicy,
        correlation_id: &str,
    ) -> Result<bool, PipelineError> {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let delay = policy.delay_for(attempt);
                tokio::time::sleep(delay).await;
            }

            self.store.delete_by_path(&record.file_path)?;
            let result = self
                .processor
                .process_batch(
                    &[record.file_path.clone().into()],
                    Some(&self.store),
                    Some(correlation_id.to_string()),
                    None,
                )
                .await?;

            if result.successful_ingestions > 0 {
                return Ok(true);
            }
            if attempt >= policy.max_retries {
                return Ok(false);
            }
            attempt += 1;
        }
    }

    /// Load every failed and quarantined record, group by primary error
    /// kind, and work each group under its policy.
    pub async fn recover_all_failed_records(&self) -> Result<RecoveryReport, PipelineError> {
        let correlation_id = generate_correlation_id();
        let logger = self.logger.with_context(&[("correlation_id", &correlation_id)]);
        let started = Instant::now();

        let mut candidates = self.store.get_by_status(ProcessingStatus::Failed)?;
        candidates.extend(self.store.get_by_status(ProcessingStatus::Quarantined)?);

        let mut groups: HashMap<IngestErrorKind, Vec<BronzeRecord>> = HashMap::new();
        for record in candidates {
            groups
                .entry(Self::primary_error_kind(&record))
                .or_default()
                .push(record);
        }

        logger.info(&format!(
            "recovering {} failed records across {} error kinds",
            groups.values().map(Vec::len).sum::<usize>(),
            groups.len()
        ));

        let mut report = RecoveryReport {
            total_attempted: 0,
            successful: 0,
            still_failed: 0,
            skipped: 0,
            recovery_time_ms: 0,
            errors: Vec::new(),
        };
        let mut error_patterns: HashMap<String, u64> = HashMap::new();

        for (kind, records) in groups {
            *error_patterns.entry(kind.as_str().to_string()).or_insert(0) += records.len() as u64;

            if kind == IngestErrorKind::DuplicateSlug {
                let resolved = self.handle_duplicate_slug_records(&records)?;
                report.total_attempted += records.len();
                report.successful += resolved;
                continue;
            }

            let policy = policy_for(kind);
            for record in records {
                report.total_attempted += 1;
                match self.retry_record(&record, &policy, &correlation_id).await {
                    Ok(true) => report.successful += 1,
                    Ok(false) => {
                        report.still_failed += 1;
                        report.errors.push(format!(
                            "{} still failing after {} retries ({})",
                            record.file_path,
                            policy.max_retries,
                            kind.as_str()
                        ));
                    }
                    Err(err) => {
                        report.still_failed += 1;
                        report.errors.push(format!("{}: {}", record.file_path, err));
                    }
                }
            }
        }

        report.recovery_time_ms = started.elapsed().as_millis() as u64;
        self.record_invocation(&report, error_patterns);
        info!(
            "🚑 [RECOVERY] attempted {}, recovered {}, still failing {} in {}ms",
            report.total_attempted, report.successful, report.still_failed, report.recovery_time_ms
        );
        Ok(report)
    }

    /// Resolve duplicate-slug casualties: the newest capture per slug is
    /// kept, every older sibling is marked superseded. All end `processed`.
    pub fn handle_duplicate_slug_records(
        &self,
        records: &[BronzeRecord],
    ) -> Result<usize, PipelineError> {
        let mut by_slug: HashMap<&str, Vec<&BronzeRecord>> = HashMap::new();
        for record in records {
            by_slug.entry(record.school_slug.as_str()).or_default().push(record);
        }

        let mut resolved = 0;
        for (slug, mut group) in by_slug {
            group.sort_by(|a, b| b.capture_timestamp.cmp(&a.capture_timestamp));
            let newest_ts = group[0]
                .capture_timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true);

            for (index, record) in group.iter().enumerate() {
                let Some(id) = record.id else {
                    continue;
                };
                let note = if index == 0 {
                    format!("kept most recent capture {newest_ts}")
                } else {
                    format!("superseded by {newest_ts}")
                };
                if self
                    .store
                    .update_status(id, ProcessingStatus::Processed, Some(&[note]))?
                {
                    resolved += 1;
                }
            }
            info!(
                "🧹 [RECOVERY] resolved {} duplicate captures for slug {}",
                group.len(),
                slug
            );
        }
        Ok(resolved)
    }

    /// Probe each configured source directory, retrying with linear backoff.
    /// Any directory coming back resets the processor's breakers.
    pub async fn perform_drive_health_recovery(&self) -> DriveRecoveryReport {
        let mut recovered_drives = Vec::new();
        let mut healthy = true;

        for dir in self.processor.source_directories() {
            if tokio::fs::read_dir(dir).await.is_ok() {
                continue;
            }

            warn!("⚠️ [RECOVERY] source directory inaccessible: {}", dir.display());
            let mut came_back = false;
            for attempt in 1..=3u32 {
                tokio::time::sleep(Duration::from_secs(5 * attempt as u64)).await;
                if tokio::fs::read_dir(dir).await.is_ok() {
                    came_back = true;
                    break;
                }
            }

            if came_back {
                recovered_drives.push(dir.to_string_lossy().to_string());
            } else {
                healthy = false;
            }
        }

        if !recovered_drives.is_empty() {
            info!(
                "🔌 [RECOVERY] {} drives recovered, resetting breakers",
                recovered_drives.len()
            );
            self.processor.reset_circuit_breakers();
        }

        DriveRecoveryReport {
            healthy,
            recovered_drives,
        }
    }

    fn record_invocation(&self, report: &RecoveryReport, patterns: HashMap<String, u64>) {
        let mut metrics = self.metrics.write().unwrap();
        let prior_attempts = metrics.recovery_attempts;
        let new_attempts = prior_attempts + report.total_attempted as u64;

        metrics.successful_recoveries += report.successful as u64;
        metrics.failed_recoveries += report.still_failed as u64;
        if new_attempts > 0 {
            metrics.average_recovery_time_ms = (metrics.average_recovery_time_ms
                * prior_attempts as f64
                + report.recovery_time_ms as f64 * report.total_attempted as f64)
                / new_attempts as f64;
        }
        metrics.recovery_attempts = new_attempts;
        for (kind, count) in patterns {
            *metrics.error_patterns.entry(kind).or_insert(0) += count;
        }
    }
}
