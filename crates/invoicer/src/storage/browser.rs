//! Read side of the artifact layout written by [`ResultSink`](super::ResultSink).

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use super::sink::{ERRORS_FOLDER, SUMMARY_OBJECT_NAME};
use super::ObjectStore;
use crate::batch::result::BatchSummary;
use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFolder {
    /// Full key prefix, ending with `/`.
    pub prefix: String,
    /// Folder name below the root prefix (`{batch_id}_{timestamp}`).
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Markdown,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub key: String,
    /// Key relative to the batch prefix.
    pub name: String,
    pub kind: ArtifactKind,
    pub size: u64,
}

/// Validity of download links handed out by [`BatchBrowser::download_url`].
pub const DOWNLOAD_URL_EXPIRY: Duration = Duration::from_secs(3600);

pub struct BatchBrowser {
    store: Arc<dyn ObjectStore>,
    root_prefix: String,
}

impl BatchBrowser {
    pub fn new(store: Arc<dyn ObjectStore>, root_prefix: &str) -> Self {
        Self {
            store,
            root_prefix: root_prefix.to_string(),
        }
    }

    /// Batch folders under the root prefix, newest name last.
    pub async fn list_batches(&self) -> Result<Vec<BatchFolder>, StorageError> {
        let listing = self.store.list(&self.root_prefix, Some('/')).await?;
        let mut folders: Vec<BatchFolder> = listing
            .common_prefixes
            .into_iter()
            .map(|prefix| {
                let name = prefix
                    .strip_prefix(&self.root_prefix)
                    .unwrap_or(&prefix)
                    .trim_end_matches('/')
                    .to_string();
                BatchFolder { prefix, name }
            })
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Found {} batch folders under '{}'", folders.len(), self.root_prefix);
        Ok(folders)
    }

    /// Finds a batch by full prefix, folder name or batch id prefix.
    pub async fn resolve(&self, needle: &str) -> Result<BatchFolder, StorageError> {
        let needle = needle.trim().trim_end_matches('/');
        let folders = self.list_batches().await?;

        let mut matches = folders.into_iter().filter(|f| {
            f.prefix.trim_end_matches('/') == needle || f.name.starts_with(needle)
        });
        match (matches.next(), matches.next()) {
            (Some(folder), None) => Ok(folder),
            (Some(_), Some(_)) => Err(StorageError::InvalidKey(format!(
                "'{}' matches more than one batch",
                needle
            ))),
            (None, _) => Err(StorageError::NotFound(needle.to_string())),
        }
    }

    pub async fn load_summary(&self, prefix: &str) -> Result<BatchSummary, StorageError> {
        let body = self
            .store
            .get(&format!("{}{}", prefix, SUMMARY_OBJECT_NAME))
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Markdown results and error records of a batch, sorted by key.
    pub async fn list_artifacts(&self, prefix: &str) -> Result<Vec<ArtifactInfo>, StorageError> {
        let listing = self.store.list(prefix, None).await?;
        let errors_prefix = format!("{}{}", prefix, ERRORS_FOLDER);

        let mut artifacts: Vec<ArtifactInfo> = listing
            .objects
            .into_iter()
            .filter_map(|object| {
                let kind = if object.key.starts_with(&errors_prefix)
                    && object.key.ends_with(".error.txt")
                {
                    ArtifactKind::Error
                } else if object.key.ends_with(".md") {
                    ArtifactKind::Markdown
                } else {
                    return None;
                };
                let name = object.key.strip_prefix(prefix).unwrap_or(&object.key).to_string();
                Some(ArtifactInfo {
                    key: object.key,
                    name,
                    kind,
                    size: object.size,
                })
            })
            .collect();
        artifacts.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(artifacts)
    }

    pub async fn read_artifact(&self, key: &str) -> Result<String, StorageError> {
        let body = self.store.get(key).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Presigned download link for an artifact, valid for [`DOWNLOAD_URL_EXPIRY`].
    /// `None` when the backend cannot hand out links.
    pub async fn download_url(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.store.presign_get(key, DOWNLOAD_URL_EXPIRY)
    }

    /// Reads the artifact stored for an input file name within a batch.
    pub async fn read_for_file(&self, prefix: &str, file_name: &str) -> Result<String, StorageError> {
        let summary = self.load_summary(prefix).await?;
        let key = summary
            .items
            .iter()
            .find(|item| item.file_name == file_name)
            .and_then(|item| item.storage_key.clone())
            .ok_or_else(|| StorageError::NotFound(format!("{}{}", prefix, file_name)))?;
        self.read_artifact(&key).await
    }
}
