pub mod confidence;
pub mod context;
pub mod processor;
pub mod store;
pub mod tiers;
pub mod types;

pub use confidence::ConfidenceScorer;
pub use context::ExtractionContext;
pub use processor::{SilverBatchResult, SilverProcessor};
pub use store::{SilverStatistics, SilverStore};
pub use types::{ExtractionStatus, FieldConfidence, SilverRecord};
