use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use schooltrends::breaker::CircuitBreakerManager;
use schooltrends::bronze::{BronzeFileProcessor, BronzeService, BronzeStore};
use schooltrends::config::Config;
use schooltrends::recovery::ErrorRecovery;
use schooltrends::silver::{SilverProcessor, SilverStore};
use schooltrends::utils::monitoring::HealthMonitor;
use schooltrends::utils::{setup_logging, HealthServer};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenv::dotenv() {
        if !e.to_string().contains("No such file or directory") {
            eprintln!("Failed to load .env file: {e}");
        }
    }

    setup_logging()?;
    info!("Starting schooltrends pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(None)?;
    info!(
        "Configuration loaded: {} source directories, batch size {}",
        config.bronze.source_directories.len(),
        config.bronze.batch_size
    );

    let data_dir = dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".schooltrends");
    std::fs::create_dir_all(&data_dir)?;

    let bronze_store = BronzeStore::open(&data_dir.join("bronze.db"))?;
    let silver_store = SilverStore::open(&data_dir.join("silver.db"))?;

    let breakers = Arc::new(CircuitBreakerManager::new());
    let processor = Arc::new(BronzeFileProcessor::new(
        config.bronze.clone(),
        &config.breakers,
        Arc::clone(&breakers),
    ));
    processor.validate_configuration()?;

    let bronze_service = Arc::new(BronzeService::new(Arc::clone(&processor), bronze_store.clone()));
    let silver_processor = Arc::new(SilverProcessor::new(
        config.silver.clone(),
        bronze_store.clone(),
        silver_store.clone(),
        &config.breakers,
        Arc::clone(&breakers),
    ));
    let recovery = ErrorRecovery::new(bronze_store.clone(), Arc::clone(&processor));

    // Health surface: component checks plus live metric collectors.
    let monitor = Arc::new(HealthMonitor::with_default_slos());
    {
        let service = Arc::clone(&bronze_service);
        monitor.register_component("bronze", move || {
            let service = Arc::clone(&service);
            async move { Ok(service.component_health()) }
        });
    }
    {
        let breakers = Arc::clone(&breakers);
        monitor.register_metric("open_circuits", move || {
            Ok(breakers.get_open_circuits().len() as f64)
        });
    }
    monitor.register_metric("memory_usage_mb", schooltrends::utils::monitoring::process_memory_mb);

    let server = HealthServer::new(Arc::clone(&monitor), config.monitoring.clone());
    tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("Health server failed: {}", e);
        }
    });

    // One full pass: register captures, extract pending records, then give
    // failed ones their recovery attempt.
    let batch = bronze_service.run_ingestion().await?;
    if batch.failed_ingestions > 0 {
        warn!(
            "{} files failed ingestion; recovery will retry them",
            batch.failed_ingestions
        );
    }

    let silver_result = silver_processor.process_pending(None, None).await?;
    info!(
        "Silver pass: {} extracted, {} partial, {} failed",
        silver_result.extracted, silver_result.partial, silver_result.failed
    );

    if batch.failed_ingestions > 0 {
        let report = recovery.recover_all_failed_records().await?;
        info!(
            "Recovery: {} attempted, {} recovered, {} still failing",
            report.total_attempted, report.successful, report.still_failed
        );
    }

    let stats = bronze_service.get_statistics()?;
    info!(
        "Run complete: {} bronze records, average file size {:.0} bytes",
        stats.total_records, stats.average_file_size
    );

    Ok(())
}
