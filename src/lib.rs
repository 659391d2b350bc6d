pub mod config;
pub mod coordinator;
pub mod extractor;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod scraper;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use crate::config::AppConfig;
pub use crate::merge::{MergeEngine, MergeOutcome, MergeStats};
pub use crate::pipeline::{PricePipeline, RunSummary};
pub use crate::store::DatasetStore;
pub use crate::utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
