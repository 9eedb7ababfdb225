pub mod errors;
pub mod health;
pub mod logger;
pub mod monitoring;

pub use errors::PipelineError;
pub use health::HealthServer;
pub use logger::{generate_correlation_id, setup_logging, Logger, PerformanceTimer};
pub use monitoring::HealthMonitor;
