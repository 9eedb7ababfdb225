use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::bronze::processor::BronzeFileProcessor;
use crate::bronze::store::BronzeStore;
use crate::bronze::types::{BatchResult, PriorityBucket, ProcessingStatus, SourceDataset};
use crate::utils::errors::PipelineError;
use crate::utils::logger::{generate_correlation_id, Logger};
use crate::utils::monitoring::{ComponentHealth, ComponentStatus};

/// Aggregate view over the bronze store.
#[derive(Debug, Clone, Serialize)]
pub struct BronzeStatistics {
    pub total_records: u64,
    pub by_status: HashMap<ProcessingStatus, u64>,
    pub by_dataset: HashMap<SourceDataset, u64>,
    pub by_priority: HashMap<PriorityBucket, u64>,
    pub average_file_size: f64,
    pub generated_at: DateTime<Utc>,
}

/// Orchestrates bronze ingestion runs and exposes their operational surface.
pub struct BronzeService {
    processor: Arc<BronzeFileProcessor>,
    store: BronzeStore,
    logger: Logger,
}

impl BronzeService {
    pub fn new(processor: Arc<BronzeFileProcessor>, store: BronzeStore) -> Self {
        Self {
            processor,
            store,
            logger: Logger::new().with_context(&[("component", "bronze_service")]),
        }
    }

    pub fn processor(&self) -> Arc<BronzeFileProcessor> {
        Arc::clone(&self.processor)
    }

    pub fn store(&self) -> BronzeStore {
        self.store.clone()
    }

    /// One full ingestion pass: validate, discover, register. All events of
    /// the run share a correlation id.
    pub async fn run_ingestion(&self) -> Result<BatchResult, PipelineError> {
        let correlation_id = generate_correlation_id();
        let logger = self.logger.with_context(&[("correlation_id", &correlation_id)]);
        let timer = logger.start_timer("bronze_ingestion_run");

        self.processor.validate_configuration()?;
        let result = self
            .processor
            .process_all_files(Some(&self.store), Some(correlation_id.clone()))
            .await;

        match &result {
            Ok(batch) => {
                timer.end(Some("ingestion run completed"));
                info!(
                    "🏁 [BRONZE] run {}: {} files, {} registered, {} failed, {} skipped",
                    batch.batch_id,
                    batch.total_files,
                    batch.successful_ingestions,
                    batch.failed_ingestions,
                    batch.skipped_files
                );
            }
            Err(err) => {
                timer.end_with_error(err, Some("ingestion run failed"));
            }
        }
        result
    }

    pub fn get_statistics(&self) -> Result<BronzeStatistics, PipelineError> {
        Ok(BronzeStatistics {
            total_records: self.store.get_total_count()?,
            by_status: self.store.get_count_by_status()?,
            by_dataset: self.store.get_count_by_dataset()?,
            by_priority: self.store.get_count_by_priority()?,
            average_file_size: self.store.get_average_file_size()?,
            generated_at: Utc::now(),
        })
    }

    /// Health contribution for the monitor: failed when the store is
    /// unreachable, degraded while any filesystem breaker is open.
    pub fn component_health(&self) -> ComponentHealth {
        let open_circuits = {
            let metrics = self.processor.get_circuit_breaker_metrics();
            let mut open: Vec<String> = metrics
                .values()
                .filter(|m| m.state == crate::breaker::CircuitState::Open)
                .map(|m| m.name.clone())
                .collect();
            open.sort();
            open
        };

        match self.store.get_total_count() {
            Err(err) => ComponentHealth {
                name: "bronze".to_string(),
                status: ComponentStatus::Failed,
                message: format!("bronze store unreachable: {err}"),
                metrics: None,
                last_checked: Utc::now(),
                uptime_seconds: None,
            },
            Ok(total) if open_circuits.is_empty() => ComponentHealth {
                name: "bronze".to_string(),
                status: ComponentStatus::Operational,
                message: format!("{total} records registered"),
                metrics: Some(json!({ "total_records": total })),
                last_checked: Utc::now(),
                uptime_seconds: None,
            },
            Ok(total) => ComponentHealth {
                name: "bronze".to_string(),
                status: ComponentStatus::Degraded,
                message: format!("open circuits: {}", open_circuits.join(", ")),
                metrics: Some(json!({
                    "total_records": total,
                    "open_circuits": open_circuits,
                })),
                last_checked: Utc::now(),
                uptime_seconds: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerManager;
    use crate::config::{BreakerProfiles, BronzeConfig};
    use std::io::Write;
    use std::path::PathBuf;

    fn service_over(dirs: Vec<PathBuf>) -> BronzeService {
        let config = BronzeConfig {
            source_directories: dirs,
            ..BronzeConfig::default()
        };
        let processor = Arc::new(BronzeFileProcessor::new(
            config,
            &BreakerProfiles::default(),
            Arc::new(CircuitBreakerManager::new()),
        ));
        BronzeService::new(processor, BronzeStore::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_run_ingestion_registers_and_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let school = tmp.path().join("acme-high-42");
        std::fs::create_dir_all(&school).unwrap();
        let mut f = std::fs::File::create(school.join("docker_curl_20250401_120000.html")).unwrap();
        f.write_all(b"<html>acme</html>").unwrap();

        let service = service_over(vec![tmp.path().to_path_buf()]);
        let result = service.run_ingestion().await.unwrap();
        assert_eq!(result.successful_ingestions, 1);

        let stats = service.get_statistics().unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.by_status[&ProcessingStatus::Pending], 1);
        assert!(stats.average_file_size > 0.0);
    }

    #[tokio::test]
    async fn test_run_ingestion_rejects_invalid_configuration() {
        let service = service_over(Vec::new());
        assert!(matches!(
            service.run_ingestion().await,
            Err(PipelineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_component_health_operational() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service_over(vec![tmp.path().to_path_buf()]);
        let health = service.component_health();
        assert_eq!(health.status, ComponentStatus::Operational);
        assert_eq!(health.name, "bronze");
    }
}
