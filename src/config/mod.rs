use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::breaker::BreakerConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub bronze: BronzeConfig,
    pub silver: SilverConfig,
    pub monitoring: MonitoringConfig,
    pub breakers: BreakerProfiles,
}

/// Bronze ingestion settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BronzeConfig {
    pub source_directories: Vec<PathBuf>,
    pub batch_size: usize,
    pub max_file_size: u64,
    pub parallel_workers: usize,
    pub checksum_verification: bool,
    pub auto_quarantine: bool,
}

impl Default for BronzeConfig {
    fn default() -> Self {
        Self {
            source_directories: Vec::new(),
            batch_size: 100,
            max_file_size: 10 * 1024 * 1024,
            parallel_workers: 4,
            checksum_verification: true,
            auto_quarantine: true,
        }
    }
}

/// Silver extraction settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SilverConfig {
    pub input_batch_size: usize,
    pub parallel_workers: usize,
    /// Field values below this confidence are discarded before merging.
    pub min_confidence_threshold: f64,
    pub enable_fallback_extraction: bool,
    pub enable_data_validation: bool,
    pub max_extraction_time_ms: u64,
}

impl Default for SilverConfig {
    fn default() -> Self {
        Self {
            input_batch_size: 100,
            parallel_workers: 4,
            min_confidence_threshold: 0.0,
            enable_fallback_extraction: true,
            enable_data_validation: true,
            max_extraction_time_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub host: String,
    pub health_check_port: u16,
    pub enable_cors: bool,
    pub max_request_time_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            health_check_port: 8080,
            enable_cors: false,
            max_request_time_ms: 30_000,
        }
    }
}

/// Per-operation-class breaker tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerProfiles {
    pub external_drive: BreakerConfig,
    pub database: BreakerConfig,
    pub file_processing: BreakerConfig,
}

impl Default for BreakerProfiles {
    fn default() -> Self {
        Self {
            external_drive: BreakerConfig::external_drive(),
            database: BreakerConfig::database(),
            file_processing: BreakerConfig::file_processing(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bronze: BronzeConfig::default(),
            silver: SilverConfig::default(),
            monitoring: MonitoringConfig::default(),
            breakers: BreakerProfiles::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (or the default location), apply
    /// environment overrides, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_file = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                home_dir.join(".schooltrends").join("config.toml")
            }
        };

        let mut config = if config_file.exists() {
            info!("Loading configuration from: {}", config_file.display());
            let content = fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {}", config_file.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_file.display()))?
        } else {
            warn!("Config file not found, using default configuration");
            Self::default()
        };

        config.load_from_env()?;
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    fn load_from_env(&mut self) -> Result<()> {
        if let Ok(dirs) = std::env::var("SCHOOLTRENDS_SOURCE_DIRS") {
            if !dirs.is_empty() {
                self.bronze.source_directories =
                    dirs.split(',').map(|s| PathBuf::from(s.trim())).collect();
                info!(
                    "Loaded {} source directories from environment",
                    self.bronze.source_directories.len()
                );
            }
        }

        if let Ok(batch) = std::env::var("SCHOOLTRENDS_BATCH_SIZE") {
            match batch.parse::<usize>() {
                Ok(n) => self.bronze.batch_size = n,
                Err(e) => warn!("Failed to parse SCHOOLTRENDS_BATCH_SIZE: {}", e),
            }
        }

        if let Ok(workers) = std::env::var("SCHOOLTRENDS_PARALLEL_WORKERS") {
            match workers.parse::<usize>() {
                Ok(n) => {
                    self.bronze.parallel_workers = n;
                    self.silver.parallel_workers = n;
                }
                Err(e) => warn!("Failed to parse SCHOOLTRENDS_PARALLEL_WORKERS: {}", e),
            }
        }

        if let Ok(port) = std::env::var("SCHOOLTRENDS_HEALTH_PORT") {
            match port.parse::<u16>() {
                Ok(n) => self.monitoring.health_check_port = n,
                Err(e) => warn!("Failed to parse SCHOOLTRENDS_HEALTH_PORT: {}", e),
            }
        }

        Ok(())
    }

    /// Fatal-at-startup configuration rules.
    pub fn validate(&self) -> Result<()> {
        if self.bronze.source_directories.is_empty() {
            anyhow::bail!("at least one source directory must be configured");
        }
        if self.bronze.batch_size == 0 {
            anyhow::bail!("bronze batch_size must be positive");
        }
        if self.bronze.parallel_workers == 0 {
            anyhow::bail!("bronze parallel_workers must be positive");
        }
        if self.silver.input_batch_size == 0 {
            anyhow::bail!("silver input_batch_size must be positive");
        }
        if self.silver.parallel_workers == 0 {
            anyhow::bail!("silver parallel_workers must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.bronze.source_directories = vec![PathBuf::from("/captures")];
        config
    }

    #[test]
    fn test_defaults_match_operational_profile() {
        let config = Config::default();
        assert_eq!(config.bronze.batch_size, 100);
        assert_eq!(config.bronze.parallel_workers, 4);
        assert_eq!(config.bronze.max_file_size, 10 * 1024 * 1024);
        assert!(config.bronze.checksum_verification);
        assert!(config.bronze.auto_quarantine);
        assert_eq!(config.monitoring.max_request_time_ms, 30_000);
    }

    #[test]
    fn test_validate_rejects_empty_source_directories() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = valid_config();
        config.bronze.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = valid_config();
        config.bronze.parallel_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = valid_config();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.bronze.source_directories, config.bronze.source_directories);
        assert_eq!(parsed.breakers.database.failure_threshold, 3);
    }
}
