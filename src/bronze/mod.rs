pub mod processor;
pub mod service;
pub mod store;
pub mod types;

pub use processor::BronzeFileProcessor;
pub use service::{BronzeService, BronzeStatistics};
pub use store::BronzeStore;
pub use types::{BatchResult, BronzeRecord, IngestErrorKind, ProcessingStatus, SourceDataset};
