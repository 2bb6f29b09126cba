//! Batch extraction: one task per eligible file, a shared rate limiter,
//! results aggregated into a [`BatchSummary`] once every task has resolved.

pub mod config;
pub mod coordinator;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod rate_limiter;
pub mod result;

pub use config::BatchConfig;
pub use coordinator::{BatchOutcome, BatchProcessor};
pub use job::{BatchJob, InputFile};
pub use pipeline::ItemPipeline;
pub use progress::{
    BroadcastProgress, CompositeProgress, FileProgress, InMemoryProgress, NoopProgress,
    ProgressEvent, ProgressReporter, ProgressSnapshot,
};
pub use rate_limiter::RateLimiter;
pub use result::{BatchSummary, ItemResult, SummaryItem};
