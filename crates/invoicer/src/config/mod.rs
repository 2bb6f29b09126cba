pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_from_str, save_config, validate_config,
    MAX_TIMEOUT_SECS, MAX_WINDOW_SECS,
};
pub use schema::{
    Config, FileSystemStorageConfig, InferenceConfig, InferenceProvider, KeyDisambiguation,
    RateLimitConfig, RetryConfig, S3StorageConfig, StorageBackend, StorageConfig,
    DEFAULT_EXTRACTION_PROMPT,
};
