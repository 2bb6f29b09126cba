use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{group_listing, validate_key, Listing, ObjectInfo, ObjectMetadata, ObjectStore};
use crate::error::StorageError;

const META_DIR: &str = ".meta";
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    #[serde(default)]
    metadata: ObjectMetadata,
}

/// Stores objects as plain files under `{root}/{bucket}/{key}`.
///
/// Content type and user metadata live in a parallel tree under
/// `{root}/.meta/{bucket}/` so listings only ever see the artifacts.
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    root: PathBuf,
    bucket: String,
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes via a temp file in the target directory and renames into place,
/// so readers never observe a half-written object.
async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| io_error(dir, e))?;

    let temp = dir.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));
    tokio::fs::write(&temp, body)
        .await
        .map_err(|e| io_error(&temp, e))?;

    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(io_error(path, e));
    }
    Ok(())
}

impl FileSystemStore {
    pub fn new<P: AsRef<Path>>(root: P, bucket: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            bucket: bucket.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    fn object_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.bucket_dir(), |path, segment| path.join(segment))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        let base = self.root.join(META_DIR).join(&self.bucket);
        let path = key.split('/').fold(base, |path, segment| path.join(segment));
        let mut name = path.into_os_string();
        name.push(".json");
        PathBuf::from(name)
    }

    /// Content type and metadata recorded for `key`, if any.
    pub async fn metadata(&self, key: &str) -> Result<(String, ObjectMetadata), StorageError> {
        validate_key(key)?;
        let path = self.sidecar_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        let sidecar: Sidecar = serde_json::from_slice(&raw)?;
        Ok((sidecar.content_type, sidecar.metadata))
    }

    /// Every object key below the bucket directory, sorted.
    async fn walk(&self, start: &Path) -> Result<Vec<ObjectInfo>, StorageError> {
        let bucket_dir = self.bucket_dir();
        let mut entries = Vec::new();
        let mut pending = vec![start.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&dir, e)),
            };

            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| io_error(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| io_error(&path, e))?;

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&bucket_dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");

                let meta = entry.metadata().await.map_err(|e| io_error(&path, e))?;
                entries.push(ObjectInfo {
                    key,
                    size: meta.len(),
                    last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[async_trait]
impl ObjectStore for FileSystemStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        validate_key(key)?;

        let path = self.object_path(key);
        write_atomic(&path, &body).await?;

        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            metadata: metadata.clone(),
        };
        let sidecar_json = serde_json::to_vec_pretty(&sidecar)?;
        if let Err(e) = write_atomic(&self.sidecar_path(key), &sidecar_json).await {
            warn!("Stored {} but failed to record its metadata: {}", key, e);
        }

        debug!("Wrote {} bytes to {}", body.len(), path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        let path = self.object_path(key);
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing, StorageError> {
        // Only descend as far as the prefix's directory part.
        let start = match prefix.rfind('/') {
            Some(idx) => {
                let dir = &prefix[..idx];
                if dir.split('/').any(|s| s == ".." || s == ".") {
                    return Err(StorageError::InvalidKey(prefix.to_string()));
                }
                self.object_path(dir)
            }
            None => self.bucket_dir(),
        };

        let entries = self.walk(&start).await?;
        Ok(group_listing(entries, prefix, delimiter))
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta() -> ObjectMetadata {
        let mut m = ObjectMetadata::new();
        m.insert("original_filename".to_string(), "a.png".to_string());
        m
    }

    #[tokio::test]
    async fn test_put_creates_nested_file() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path(), "bucket");

        store
            .put("p/batch/a.md", b"# A".to_vec(), "text/markdown", &meta())
            .await
            .unwrap();

        let on_disk = dir.path().join("bucket").join("p").join("batch").join("a.md");
        assert_eq!(std::fs::read(on_disk).unwrap(), b"# A");
        assert_eq!(store.get("p/batch/a.md").await.unwrap(), b"# A");
    }

    #[tokio::test]
    async fn test_metadata_sidecar() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path(), "bucket");
        store
            .put("p/a.md", b"x".to_vec(), "text/markdown", &meta())
            .await
            .unwrap();

        let (content_type, metadata) = store.metadata("p/a.md").await.unwrap();
        assert_eq!(content_type, "text/markdown");
        assert_eq!(metadata.get("original_filename").unwrap(), "a.png");

        // Sidecars must not show up as objects.
        let listing = store.list("", None).await.unwrap();
        assert_eq!(listing.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path(), "bucket");
        store.put("k.md", b"one".to_vec(), "text/plain", &meta()).await.unwrap();
        store.put("k.md", b"two".to_vec(), "text/plain", &meta()).await.unwrap();
        assert_eq!(store.get("k.md").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path(), "bucket");
        let result = store.put("../outside.md", vec![], "text/plain", &meta()).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!dir.path().join("outside.md").exists());

        let result = store.list("../", None).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_list_with_delimiter() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path(), "bucket");
        for key in ["root/b1/a.md", "root/b1/errors/c.error.txt", "root/b2/_summary.json"] {
            store.put(key, b"x".to_vec(), "text/plain", &meta()).await.unwrap();
        }

        let listing = store.list("root/", Some('/')).await.unwrap();
        assert_eq!(listing.common_prefixes, vec!["root/b1/", "root/b2/"]);

        let listing = store.list("root/b1/", None).await.unwrap();
        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["root/b1/a.md", "root/b1/errors/c.error.txt"]);
    }

    #[tokio::test]
    async fn test_list_missing_bucket_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path(), "never-written");
        let listing = store.list("root/", Some('/')).await.unwrap();
        assert_eq!(listing, Listing::default());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path(), "bucket");
        assert!(matches!(store.get("x.md").await, Err(StorageError::NotFound(_))));
    }
}
