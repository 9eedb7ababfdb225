pub mod breaker;
pub mod bronze;
pub mod config;
pub mod recovery;
pub mod silver;
pub mod utils;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitBreakerManager, CircuitState};
pub use bronze::{BronzeFileProcessor, BronzeRecord, BronzeService, BronzeStore};
pub use config::Config;
pub use recovery::ErrorRecovery;
pub use silver::{SilverProcessor, SilverRecord, SilverStore};
pub use utils::errors::PipelineError;
pub use utils::{setup_logging, HealthMonitor, HealthServer, Logger};
