//! Writes per-item artifacts and the batch summary into an [`ObjectStore`].
//!
//! Layout under a batch prefix:
//!
//! ```text
//! {prefix}{base_name}.md                  extracted markdown
//! {prefix}errors/{base_name}.error.txt    error message of a failed item
//! {prefix}_summary.json                   batch summary
//! ```

use std::sync::Arc;

use chrono::SecondsFormat;
use tracing::{debug, warn};

use super::{ObjectMetadata, ObjectStore};
use crate::batch::result::{BatchSummary, ItemResult};
use crate::config::KeyDisambiguation;
use crate::error::StorageError;
use crate::sanitize::base_name;

pub const SUMMARY_OBJECT_NAME: &str = "_summary.json";
pub const ERRORS_FOLDER: &str = "errors/";

const MARKDOWN_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";
const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const SUMMARY_CONTENT_TYPE: &str = "application/json";

#[derive(Clone)]
pub struct ResultSink {
    store: Arc<dyn ObjectStore>,
    disambiguation: KeyDisambiguation,
}

impl ResultSink {
    pub fn new(store: Arc<dyn ObjectStore>, disambiguation: KeyDisambiguation) -> Self {
        Self {
            store,
            disambiguation,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Key an item's artifact is written under.
    pub fn item_key(&self, prefix: &str, result: &ItemResult) -> String {
        let mut name = base_name(&result.file_name);
        if self.disambiguation == KeyDisambiguation::Timestamp {
            name.push('_');
            name.push_str(&result.timestamp.format("%Y%m%dT%H%M%S%.3fZ").to_string());
        }

        if result.success {
            format!("{}{}.md", prefix, name)
        } else {
            format!("{}{}{}.error.txt", prefix, ERRORS_FOLDER, name)
        }
    }

    pub fn summary_key(prefix: &str) -> String {
        format!("{}{}", prefix, SUMMARY_OBJECT_NAME)
    }

    /// Persists the artifact for one item and returns its key.
    ///
    /// Successful items store their markdown; failed ones store the error
    /// message under `errors/`.
    pub async fn write_item(
        &self,
        batch_id: &str,
        prefix: &str,
        result: &ItemResult,
    ) -> Result<String, StorageError> {
        let key = self.item_key(prefix, result);

        let (body, content_type) = if result.success {
            (
                result.extracted_markdown.clone().unwrap_or_default(),
                MARKDOWN_CONTENT_TYPE,
            )
        } else {
            (
                result.error_message.clone().unwrap_or_default(),
                ERROR_CONTENT_TYPE,
            )
        };

        let mut metadata = ObjectMetadata::new();
        metadata.insert("original_filename".to_string(), result.file_name.clone());
        metadata.insert(
            "processing_timestamp".to_string(),
            result.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        metadata.insert("batch_id".to_string(), batch_id.to_string());

        match self
            .store
            .put(&key, body.into_bytes(), content_type, &metadata)
            .await
        {
            Ok(()) => {
                debug!(key = %key, "Stored item artifact");
                Ok(key)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to store item artifact");
                Err(e)
            }
        }
    }

    /// Persists the summary document and returns its key.
    pub async fn write_summary(
        &self,
        prefix: &str,
        summary: &BatchSummary,
    ) -> Result<String, StorageError> {
        let key = Self::summary_key(prefix);
        let body = serde_json::to_vec_pretty(summary)?;

        let mut metadata = ObjectMetadata::new();
        metadata.insert("batch_id".to_string(), summary.batch_id.clone());

        self.store
            .put(&key, body, SUMMARY_CONTENT_TYPE, &metadata)
            .await?;
        debug!(key = %key, "Stored batch summary");
        Ok(key)
    }
}
