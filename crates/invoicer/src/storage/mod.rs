//! Object storage for per-item artifacts and batch summaries.
//!
//! Everything above this module talks to an [`ObjectStore`]: a flat key/value
//! blob store with `put`, `get` and prefix `list`. The backends differ only in
//! where the bytes end up.

pub mod browser;
pub mod filesystem;
pub mod memory;
pub mod s3;
pub mod sink;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{ConfigError, StorageError};

pub use browser::{ArtifactInfo, ArtifactKind, BatchBrowser, BatchFolder, DOWNLOAD_URL_EXPIRY};
pub use filesystem::FileSystemStore;
pub use memory::MemoryStore;
pub use s3::{S3Credentials, S3Store};
pub use sink::{ResultSink, SUMMARY_OBJECT_NAME};

/// User metadata attached to an object (`x-amz-meta-*` on S3).
pub type ObjectMetadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Result of a prefix listing. With a delimiter, keys that continue past it
/// are rolled up into `common_prefixes` ("folders").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing, StorageError>;

    /// Bucket (or namespace) this store writes into.
    fn bucket(&self) -> &str;

    /// Time-limited URL that downloads `key` without credentials.
    /// `None` for backends that have no such thing.
    fn presign_get(&self, _key: &str, _expires: Duration) -> Result<Option<String>, StorageError> {
        Ok(None)
    }
}

/// Opens the backend selected in `config`, resolving credentials as needed.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new(&config.bucket)),
        StorageBackend::Filesystem => Arc::new(FileSystemStore::new(
            crate::secrets::expand_home(&config.filesystem.root),
            &config.bucket,
        )),
        StorageBackend::S3 => Arc::new(S3Store::from_config(config)?),
    };
    Ok(store)
}

/// Rejects keys that are empty, absolute, contain `..` segments or control characters.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.ends_with('/')
        || key.split('/').any(|segment| segment == ".." || segment == ".")
        || key.chars().any(|c| c.is_control());

    if invalid {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

/// Groups a sorted key listing under `prefix` the way S3 does with a delimiter.
pub(crate) fn group_listing<I>(entries: I, prefix: &str, delimiter: Option<char>) -> Listing
where
    I: IntoIterator<Item = ObjectInfo>,
{
    let mut listing = Listing::default();

    for info in entries {
        let Some(rest) = info.key.strip_prefix(prefix) else {
            continue;
        };

        match delimiter.and_then(|d| rest.find(d).map(|idx| (d, idx))) {
            Some((d, idx)) => {
                let folder = format!("{}{}{}", prefix, &rest[..idx], d);
                if listing.common_prefixes.last() != Some(&folder) {
                    listing.common_prefixes.push(folder);
                }
            }
            None => listing.objects.push(info),
        }
    }

    listing.common_prefixes.dedup();
    listing
}
