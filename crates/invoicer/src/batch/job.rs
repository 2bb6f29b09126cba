use std::path::Path;

use chrono::{DateTime, Utc};

/// MIME type used when neither the caller nor the extension says otherwise.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// One uploaded file: raw bytes plus what the caller says it is.
#[derive(Clone)]
pub struct InputFile {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for InputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl InputFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Reads a file from disk, guessing its MIME type from the extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type =
            Self::detect_mime_type(path).unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string());

        Ok(Self::new(name, mime_type, data))
    }

    /// Detects MIME type from file path using the mime_guess crate.
    /// Returns `None` for unknown extensions.
    pub fn detect_mime_type(path: &Path) -> Option<String> {
        mime_guess::from_path(path).first().map(|m| m.to_string())
    }

    /// Only declared images are sent to the model. The bytes are not sniffed.
    pub fn is_eligible(&self) -> bool {
        self.mime_type
            .trim()
            .to_ascii_lowercase()
            .starts_with("image/")
    }
}

/// A submitted set of files with its identity.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<InputFile>,
}

impl BatchJob {
    pub fn new(items: Vec<InputFile>) -> Self {
        Self {
            batch_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            items,
        }
    }

    /// `{root_prefix}{batch_id}_{YYYY-MM-DD_HH-MM-SS}/`, unique per batch.
    pub fn storage_prefix(&self, root_prefix: &str) -> String {
        format!(
            "{}{}_{}/",
            root_prefix,
            self.batch_id,
            self.created_at.format("%Y-%m-%d_%H-%M-%S")
        )
    }

    /// Splits the items into eligible files and names of skipped files,
    /// both in submission order.
    pub fn partition(self) -> (Vec<InputFile>, Vec<String>) {
        let mut eligible = Vec::new();
        let mut skipped = Vec::new();
        for item in self.items {
            if item.is_eligible() {
                eligible.push(item);
            } else {
                skipped.push(item.name);
            }
        }
        (eligible, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_eligibility() {
        assert!(InputFile::new("a.png", "image/png", vec![]).is_eligible());
        assert!(InputFile::new("a.jpg", "IMAGE/JPEG", vec![]).is_eligible());
        assert!(!InputFile::new("notes.txt", "text/plain", vec![]).is_eligible());
        assert!(!InputFile::new("scan.pdf", "application/pdf", vec![]).is_eligible());
        assert!(!InputFile::new("x", "", vec![]).is_eligible());
    }

    #[test]
    fn test_from_path_guesses_mime() {
        let mut file = Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"bytes").unwrap();

        let input = InputFile::from_path(file.path()).unwrap();
        assert_eq!(input.mime_type, "image/png");
        assert_eq!(input.data, b"bytes");
        assert!(input.name.ends_with(".png"));
    }

    #[test]
    fn test_from_path_unknown_extension() {
        let file = Builder::new().suffix(".zzunknown").tempfile().unwrap();
        let input = InputFile::from_path(file.path()).unwrap();
        assert_eq!(input.mime_type, FALLBACK_MIME_TYPE);
        assert!(!input.is_eligible());
    }

    #[test]
    fn test_storage_prefix_format() {
        let job = BatchJob::new(vec![]);
        let prefix = job.storage_prefix("invoice_processing/");

        assert!(prefix.starts_with(&format!("invoice_processing/{}_", job.batch_id)));
        assert!(prefix.ends_with('/'));
        let stamp = &prefix["invoice_processing/".len() + job.batch_id.len() + 1..prefix.len() - 1];
        assert_eq!(stamp.len(), "2024-01-31_12-00-00".len());
        assert_eq!(stamp, job.created_at.format("%Y-%m-%d_%H-%M-%S").to_string());
    }

    #[test]
    fn test_batch_ids_unique() {
        let a = BatchJob::new(vec![]);
        let b = BatchJob::new(vec![]);
        assert_ne!(a.batch_id, b.batch_id);
        assert_ne!(a.storage_prefix(""), b.storage_prefix(""));
    }

    #[test]
    fn test_partition_keeps_order() {
        let job = BatchJob::new(vec![
            InputFile::new("a.png", "image/png", vec![]),
            InputFile::new("notes.txt", "text/plain", vec![]),
            InputFile::new("b.jpg", "image/jpeg", vec![]),
        ]);

        let (eligible, skipped) = job.partition();
        let names: Vec<_> = eligible.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.jpg"]);
        assert_eq!(skipped, vec!["notes.txt"]);
    }
}
