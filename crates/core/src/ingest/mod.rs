pub mod pipeline;
pub mod provider;
pub mod types;

pub use pipeline::{BatchProcessor, IngestReport, PipelineConfig, PipelineError, PipelineState};
pub use provider::{FeedClient, HttpFeedClient};
pub use types::FeedPage;
