use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::secrets::CredentialSource;

/// Extraction prompt sent with every invoice image unless overridden.
pub const DEFAULT_EXTRACTION_PROMPT: &str = "\
Extract detailed information from this invoice:

1. Invoice number
2. Date
3. Vendor/Company name
4. Total amount
5. Line items with descriptions and prices
6. Payment terms
7. Contact information

Format the output as clean markdown with appropriate headers and tables.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            inference: InferenceConfig::default(),
            storage: StorageConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceProvider {
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_provider")]
    pub provider: InferenceProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_key")]
    pub api_key: CredentialSource,
    /// Upper bound for a single remote call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Replaces [`DEFAULT_EXTRACTION_PROMPT`] when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

fn default_provider() -> InferenceProvider {
    InferenceProvider::Gemini
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_api_key() -> CredentialSource {
    CredentialSource::env("GEMINI_API_KEY")
}

fn default_timeout_secs() -> u64 {
    120
}

impl InferenceConfig {
    pub fn prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or(DEFAULT_EXTRACTION_PROMPT)
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: default_endpoint(),
            api_key: default_api_key(),
            timeout_secs: default_timeout_secs(),
            prompt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Filesystem,
    S3,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "fs" => Ok(StorageBackend::Filesystem),
            "s3" => Ok(StorageBackend::S3),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// How per-item artifact keys are kept apart when two inputs share a base name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDisambiguation {
    /// `{prefix}{base_name}.md`; the last writer for a key wins.
    #[default]
    None,
    /// `{prefix}{base_name}_{timestamp}.md`.
    Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Namespace every batch folder is created under. Must end with `/` or be empty.
    #[serde(default = "default_root_prefix")]
    pub root_prefix: String,
    #[serde(default)]
    pub key_disambiguation: KeyDisambiguation,
    #[serde(default)]
    pub filesystem: FileSystemStorageConfig,
    #[serde(default)]
    pub s3: S3StorageConfig,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Filesystem
}

fn default_bucket() -> String {
    "invoices-data".to_string()
}

fn default_root_prefix() -> String {
    "invoice_processing/".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            bucket: default_bucket(),
            root_prefix: default_root_prefix(),
            key_disambiguation: KeyDisambiguation::default(),
            filesystem: FileSystemStorageConfig::default(),
            s3: S3StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSystemStorageConfig {
    #[serde(default = "default_fs_root")]
    pub root: String,
}

fn default_fs_root() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("invoicer")
        .to_string_lossy()
        .into_owned()
}

impl Default for FileSystemStorageConfig {
    fn default() -> Self {
        Self {
            root: default_fs_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StorageConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, R2). Uses path-style addressing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_access_key_id")]
    pub access_key_id: CredentialSource,
    #[serde(default = "default_secret_access_key")]
    pub secret_access_key: CredentialSource,
    #[serde(default = "default_session_token")]
    pub session_token: CredentialSource,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_access_key_id() -> CredentialSource {
    CredentialSource::env("AWS_ACCESS_KEY_ID")
}

fn default_secret_access_key() -> CredentialSource {
    CredentialSource::env("AWS_SECRET_ACCESS_KEY")
}

fn default_session_token() -> CredentialSource {
    CredentialSource::env("AWS_SESSION_TOKEN")
}

impl Default for S3StorageConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            access_key_id: default_access_key_id(),
            secret_access_key: default_secret_access_key(),
            session_token: default_session_token(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_operations")]
    pub max_operations: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_operations() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            window_secs: default_window_secs(),
        }
    }
}

/// Automatic retry of failed remote calls. Zero means failures are recorded
/// as-is and resubmission is left to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
}
