pub mod batch;
pub mod config;
pub mod error;
pub mod inference;
pub mod sanitize;
pub mod secrets;
pub mod storage;

pub use batch::{
    BatchConfig, BatchOutcome, BatchProcessor, BatchSummary, InputFile, ItemResult,
    ProgressEvent, ProgressReporter, RateLimiter,
};
pub use config::{load_config, Config};
pub use error::{ConfigError, InvoicerError, ItemError, Result, StorageError};
pub use inference::{GeminiClient, ImagePayload, InferenceClient, InferenceError};
pub use secrets::{resolve_secret, resolve_secret_optional, CredentialSource, SecretError};
pub use storage::{BatchBrowser, ObjectStore, ResultSink};
