use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::{CircuitBreaker, CircuitBreakerManager};
use crate::bronze::store::BronzeStore;
use crate::bronze::types::{BronzeRecord, PriorityBucket, ProcessingStatus};
use crate::config::{BreakerProfiles, SilverConfig};
use crate::silver::confidence::ConfidenceScorer;
use crate::silver::context::ExtractionContext;
use crate::silver::store::SilverStore;
use crate::silver::tiers::{self, apply_field, TierOutcome};
use crate::silver::types::{ExtractionStatus, SilverRecord};
use crate::utils::errors::PipelineError;
use crate::utils::logger::{generate_correlation_id, Logger};

/// Aggregated outcome of one silver pass.
#[derive(Debug, Clone, Serialize)]
pub struct SilverBatchResult {
    pub batch_id: String,
    pub correlation_id: String,
    pub total_records: usize,
    pub extracted: usize,
    pub partial: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}

fn merge_outcome(
    record: &mut SilverRecord,
    confidences: &mut HashMap<&'static str, f64>,
    already_set: &mut HashSet<&'static str>,
    errors: &mut Vec<String>,
    outcome: TierOutcome,
    min_confidence: f64,
) {
    for value in outcome.values {
        if already_set.contains(value.field) {
            continue;
        }
        if value.confidence < min_confidence {
            debug!(
                "🪫 [SILVER] dropping {} at confidence {:.0} (threshold {:.0})",
                value.field, value.confidence, min_confidence
            );
            continue;
        }
        if apply_field(record, &value) {
            confidences.insert(value.field, value.confidence);
            already_set.insert(value.field);
        }
    }
    for error in outcome.errors {
        errors.push(format!("{}: {}", error.field, error.message));
    }
}

/// Range checks applied across tiers before scoring.
fn validate_ranges(record: &mut SilverRecord, confidences: &mut HashMap<&'static str, f64>) {
    let mut drop_pct = |field: &'static str, value: &mut Option<f64>| {
        if let Some(v) = *value {
            if !(0.0..=100.0).contains(&v) {
                *value = None;
                confidences.remove(field);
            }
        }
    };
    drop_pct("ap_participation_rate", &mut record.ap_participation_rate);
    drop_pct("ap_pass_rate", &mut record.ap_pass_rate);
    drop_pct("math_proficiency", &mut record.math_proficiency);
    drop_pct("reading_proficiency", &mut record.reading_proficiency);
    drop_pct("science_proficiency", &mut record.science_proficiency);
    drop_pct("graduation_rate", &mut record.graduation_rate);
    drop_pct("white_pct", &mut record.white_pct);
    drop_pct("black_pct", &mut record.black_pct);
    drop_pct("hispanic_pct", &mut record.hispanic_pct);
    drop_pct("asian_pct", &mut record.asian_pct);
    drop_pct("american_indian_pct", &mut record.american_indian_pct);
    drop_pct("pacific_islander_pct", &mut record.pacific_islander_pct);
    drop_pct("two_or_more_pct", &mut record.two_or_more_pct);
    drop_pct("minority_enrollment_pct", &mut record.minority_enrollment_pct);
    drop_pct("female_pct", &mut record.female_pct);
    drop_pct("male_pct", &mut record.male_pct);
    drop_pct(
        "economically_disadvantaged_pct",
        &mut record.economically_disadvantaged_pct,
    );

    if let Some(rank) = record.national_rank {
        if rank == 0 || rank > tiers::NATIONAL_RANK_MAX {
            record.national_rank = None;
            confidences.remove("national_rank");
        }
    }
    if let Some(rank) = record.state_rank {
        if rank == 0 || rank > tiers::STATE_RANK_MAX {
            record.state_rank = None;
            confidences.remove("state_rank");
        }
    }
    if let Some(enrollment) = record.enrollment {
        if !(tiers::ENROLLMENT_MIN..=tiers::ENROLLMENT_MAX).contains(&enrollment) {
            record.enrollment = None;
            confidences.remove("enrollment");
        }
    }
}

/// The CPU-bound extraction path: parse, run the tiers in precedence order,
/// score, classify. Runs on a blocking worker.
fn run_extraction(bronze: &BronzeRecord, content: String, config: &SilverConfig) -> SilverRecord {
    let mut ctx = ExtractionContext::new(&bronze.file_path, &bronze.school_slug, content);
    let source_year = ctx.source_year();
    let bronze_id = bronze.id.unwrap_or_default();

    let mut record = SilverRecord::empty(bronze_id, &bronze.school_slug, source_year);
    let mut confidences: HashMap<&'static str, f64> = HashMap::new();
    let mut already_set: HashSet<&'static str> = HashSet::new();
    let mut errors: Vec<String> = Vec::new();
    let min_confidence = config.min_confidence_threshold;

    // Tier precedence: structured data, then selectors, then regex. Earlier
    // tiers hold their fields against later, lower-confidence ones.
    let structured = tiers::structured::extract(&mut ctx);
    merge_outcome(
        &mut record,
        &mut confidences,
        &mut already_set,
        &mut errors,
        structured,
        min_confidence,
    );

    let populated = already_set.clone();
    let from_selectors = tiers::selectors::extract(&mut ctx, &populated);
    merge_outcome(
        &mut record,
        &mut confidences,
        &mut already_set,
        &mut errors,
        from_selectors,
        min_confidence,
    );

    if config.enable_fallback_extraction {
        let populated = already_set.clone();
        let from_patterns = tiers::patterns::extract(&ctx, &populated);
        merge_outcome(
            &mut record,
            &mut confidences,
            &mut already_set,
            &mut errors,
            from_patterns,
            min_confidence,
        );
    }

    if config.enable_data_validation {
        validate_ranges(&mut record, &mut confidences);
    }

    record.field_confidence = ConfidenceScorer::category_scores(&confidences);
    record.extraction_confidence = ConfidenceScorer::overall(&record.field_confidence);
    record.extraction_status = ConfidenceScorer::classify(record.non_null_payload_count());
    record.processing_errors = errors;
    ctx.cleanup();
    record
}

/// Coarse ranking-coverage bucket derived from the extracted ranks.
fn classify_priority(record: &SilverRecord) -> PriorityBucket {
    if record.national_rank.is_some() {
        PriorityBucket::Bucket1
    } else if record.state_rank.is_some() {
        PriorityBucket::Bucket2
    } else if record.extraction_status != ExtractionStatus::Failed {
        PriorityBucket::Bucket3
    } else {
        PriorityBucket::Unknown
    }
}

/// Reads pending bronze records, runs the extraction tiers over their
/// files, and persists confidence-scored silver records.
pub struct SilverProcessor {
    config: SilverConfig,
    bronze_store: BronzeStore,
    silver_store: SilverStore,
    read_breaker: Arc<CircuitBreaker>,
    logger: Logger,
}

impl SilverProcessor {
    pub fn new(
        config: SilverConfig,
        bronze_store: BronzeStore,
        silver_store: SilverStore,
        profiles: &BreakerProfiles,
        breakers: Arc<CircuitBreakerManager>,
    ) -> Self {
        let read_breaker = breakers.register("silver_file_read", profiles.external_drive.clone());
        Self {
            config,
            bronze_store,
            silver_store,
            read_breaker,
            logger: Logger::new().with_context(&[("component", "silver_processor")]),
        }
    }

    pub fn validate_configuration(&self) -> Result<(), PipelineError> {
        if self.config.input_batch_size == 0 {
            return Err(PipelineError::Config(
                "input_batch_size must be positive".to_string(),
            ));
        }
        if self.config.parallel_workers == 0 {
            return Err(PipelineError::Config(
                "parallel_workers must be positive".to_string(),
            ));
        }
        Ok(())
    }

    async fn read_content(&self, file_path: &str) -> Result<String, String> {
        let path = file_path.to_string();
        let outcome = self
            .read_breaker
            .execute(|| {
                let path = path.clone();
                async move { tokio::fs::read(&path).await.map_err(PipelineError::from) }
            })
            .await;
        match outcome.data {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            None => Err(outcome.error.unwrap_or_else(|| "file read failed".to_string())),
        }
    }

    /// Extract one bronze record. Returns the resulting extraction status,
    /// or the error message that prevented a silver record from existing.
    pub async fn process_record(&self, bronze: &BronzeRecord) -> Result<ExtractionStatus, String> {
        let Some(bronze_id) = bronze.id else {
            return Err(format!("bronze record for {} has no id", bronze.file_path));
        };

        if let Err(err) =
            self.bronze_store
                .update_status(bronze_id, ProcessingStatus::Processing, None)
        {
            return Err(format!("failed to mark bronze {bronze_id} processing: {err}"));
        }

        let content = match self.read_content(&bronze.file_path).await {
            Ok(content) => content,
            Err(message) => {
                let recorded = vec![format!("file_read: {message}")];
                let _ = self.bronze_store.update_status(
                    bronze_id,
                    ProcessingStatus::Failed,
                    Some(&recorded),
                );
                return Err(message);
            }
        };

        let config = self.config.clone();
        let bronze_clone = bronze.clone();
        let extraction = tokio::time::timeout(
            Duration::from_millis(self.config.max_extraction_time_ms),
            tokio::task::spawn_blocking(move || run_extraction(&bronze_clone, content, &config)),
        )
        .await;

        let record = match extraction {
            Err(_) => {
                let message = format!(
                    "extraction timed out after {}ms",
                    self.config.max_extraction_time_ms
                );
                let recorded = vec![format!("extraction_timeout: {message}")];
                let _ = self.bronze_store.update_status(
                    bronze_id,
                    ProcessingStatus::Failed,
                    Some(&recorded),
                );
                return Err(message);
            }
            Ok(Err(join_error)) => {
                let message = format!("extraction task aborted: {join_error}");
                let recorded = vec![message.clone()];
                let _ = self.bronze_store.update_status(
                    bronze_id,
                    ProcessingStatus::Failed,
                    Some(&recorded),
                );
                return Err(message);
            }
            Ok(Ok(record)) => record,
        };

        let status = record.extraction_status;
        if let Err(err) = self.silver_store.upsert_by_bronze_id(&record) {
            let message = format!("silver persist failed: {err}");
            let recorded = vec![message.clone()];
            let _ = self.bronze_store.update_status(
                bronze_id,
                ProcessingStatus::Failed,
                Some(&recorded),
            );
            return Err(message);
        }

        let _ = self
            .bronze_store
            .update_priority_bucket(bronze_id, classify_priority(&record));
        let _ = self
            .bronze_store
            .update_status(bronze_id, ProcessingStatus::Processed, None);

        debug!(
            "🥈 [SILVER] bronze {} extracted as {} ({} fields, confidence {:.0})",
            bronze_id,
            status.as_str(),
            record.non_null_payload_count(),
            record.extraction_confidence
        );
        Ok(status)
    }

    /// Run extraction over pending bronze records, chunked by the worker
    /// count. A record is never processed twice within one pass.
    pub async fn process_pending(
        &self,
        limit: Option<usize>,
        correlation_id: Option<String>,
    ) -> Result<SilverBatchResult, PipelineError> {
        self.validate_configuration()?;

        let correlation_id = correlation_id.unwrap_or_else(generate_correlation_id);
        let batch_id = format!("silver-{}", Uuid::new_v4());
        let logger = self
            .logger
            .with_context(&[("correlation_id", &correlation_id), ("batch_id", &batch_id)]);
        let started = Instant::now();

        let mut pending = self.bronze_store.get_by_status(ProcessingStatus::Pending)?;
        let cap = limit.unwrap_or(self.config.input_batch_size);
        pending.truncate(cap);

        logger.info(&format!("extracting {} pending records", pending.len()));

        let mut result = SilverBatchResult {
            batch_id,
            correlation_id,
            total_records: pending.len(),
            extracted: 0,
            partial: 0,
            failed: 0,
            errors: Vec::new(),
            elapsed_ms: 0,
        };

        for chunk in pending.chunks(self.config.parallel_workers.max(1)) {
            let outcomes =
                futures::future::join_all(chunk.iter().map(|record| self.process_record(record)))
                    .await;
            for outcome in outcomes {
                match outcome {
                    Ok(ExtractionStatus::Extracted) => result.extracted += 1,
                    Ok(ExtractionStatus::Partial) => result.partial += 1,
                    Ok(_) => result.failed += 1,
                    Err(message) => {
                        result.failed += 1;
                        warn!("⚠️ [SILVER] record extraction failed: {}", message);
                        result.errors.push(message);
                    }
                }
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "📊 [SILVER] batch {}: {} extracted, {} partial, {} failed in {}ms",
            result.batch_id, result.extracted, result.partial, result.failed, result.elapsed_ms
        );
        Ok(result)
    }
}
