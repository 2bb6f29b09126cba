use std::path::PathBuf;
use thiserror::Error;

pub use crate::inference::InferenceError;
pub use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum InvoicerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Missing required credential: {name}")]
    MissingCredential { name: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend failed for '{key}': {message}")]
    Backend { key: String, message: String },

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Failed to serialize object: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request signing failed: {0}")]
    Signing(String),
}

/// Per-item failures. These never cross the batch boundary; the pipeline
/// turns them into failed `ItemResult`s.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("{0}")]
    Inference(#[from] InferenceError),

    #[error("Task fault: {0}")]
    Fault(String),
}

pub type Result<T> = std::result::Result<T, InvoicerError>;
