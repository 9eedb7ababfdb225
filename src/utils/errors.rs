use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Circuit breaker '{0}' is OPEN")]
    CircuitOpen(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Recovery error: {0}")]
    Recovery(String),

    #[error("Health check error: {0}")]
    Health(String),
}
