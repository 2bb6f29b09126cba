use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ItemError;

/// Outcome of processing one input file.
///
/// Exactly one of `extracted_markdown` / `error_message` is set, matching
/// `success`. Build values through [`ItemResult::extracted`] and
/// [`ItemResult::failed`] to keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub file_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    /// Set when the item itself was fine but its artifact could not be stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_error: Option<String>,
    /// Remote calls made for this item (0 when it failed before the first call).
    #[serde(default)]
    pub attempts: u32,
}

impl ItemResult {
    /// A successful extraction. The text is trimmed; blank text becomes a failure.
    pub fn extracted(file_name: &str, text: &str, attempts: u32) -> Self {
        let markdown = text.trim();
        if markdown.is_empty() {
            return Self::failed(file_name, "Empty response from model", attempts);
        }

        Self {
            file_name: file_name.to_string(),
            success: true,
            extracted_markdown: Some(markdown.to_string()),
            error_message: None,
            timestamp: Utc::now(),
            storage_key: None,
            storage_error: None,
            attempts,
        }
    }

    pub fn failed(file_name: &str, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            file_name: file_name.to_string(),
            success: false,
            extracted_markdown: None,
            error_message: Some(error.into()),
            timestamp: Utc::now(),
            storage_key: None,
            storage_error: None,
            attempts,
        }
    }

    /// Failure recorded for an item whose task never reported back.
    /// `attempts` counts the remote calls the task had started before it died.
    pub fn fault(file_name: &str, detail: &str, attempts: u32) -> Self {
        Self::failed(file_name, ItemError::Fault(detail.to_string()).to_string(), attempts)
    }

    pub fn with_storage_key(mut self, key: String) -> Self {
        self.storage_key = Some(key);
        self
    }

    pub fn with_storage_error(mut self, error: String) -> Self {
        self.storage_error = Some(error);
        self
    }

    pub fn is_consistent(&self) -> bool {
        self.success == self.extracted_markdown.is_some()
            && self.success != self.error_message.is_some()
    }
}

/// Per-item line of the batch summary. Carries no extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryItem {
    pub file_name: String,
    pub success: bool,
    #[serde(default)]
    pub storage_key: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_error: Option<String>,
}

impl From<&ItemResult> for SummaryItem {
    fn from(result: &ItemResult) -> Self {
        Self {
            file_name: result.file_name.clone(),
            success: result.success,
            storage_key: result.storage_key.clone(),
            error: result.error_message.clone(),
            storage_error: result.storage_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    /// Every submitted file, eligible or not.
    pub total_files: usize,
    /// Eligible files that went through the pipeline.
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub storage_prefix: String,
    /// One entry per processed file, in submission order.
    pub items: Vec<SummaryItem>,
    /// Names of files skipped because they were not images.
    #[serde(default)]
    pub skipped: Vec<String>,
}

impl BatchSummary {
    /// Counts are derived from `results`, never tracked separately.
    pub fn from_results(
        batch_id: &str,
        created_at: DateTime<Utc>,
        total_files: usize,
        storage_prefix: &str,
        results: &[ItemResult],
        skipped: Vec<String>,
    ) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            batch_id: batch_id.to_string(),
            created_at,
            total_files,
            total_processed: results.len(),
            successful,
            failed: results.len() - successful,
            storage_prefix: storage_prefix.to_string(),
            items: results.iter().map(SummaryItem::from).collect(),
            skipped,
        }
    }
}
