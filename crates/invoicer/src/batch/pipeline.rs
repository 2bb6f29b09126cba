use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::ItemError;
use crate::inference::{ImagePayload, InferenceClient, InferenceError};
use crate::storage::ResultSink;

use super::config::BatchConfig;
use super::job::InputFile;
use super::rate_limiter::RateLimiter;
use super::result::ItemResult;

/// Turns one eligible input into an [`ItemResult`]. Never returns an error:
/// every failure becomes a failed result.
pub struct ItemPipeline {
    inference: Arc<dyn InferenceClient>,
    limiter: Arc<RateLimiter>,
    prompt: String,
    timeout: Duration,
    max_retries: u32,
}

impl ItemPipeline {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        limiter: Arc<RateLimiter>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            inference,
            limiter,
            prompt: config.prompt.clone(),
            timeout: config.request_timeout,
            max_retries: config.max_retries,
        }
    }

    /// Rate-limit, decode, extract.
    ///
    /// A slot is taken before decoding, so undecodable files still count
    /// against the limit. Retries (when enabled) take a fresh slot each.
    pub async fn process(&self, file: InputFile) -> ItemResult {
        self.process_tracked(file, &AtomicU32::new(0)).await
    }

    /// [`process`](Self::process), publishing the number of remote calls
    /// started so far to `calls`. The counter stays readable if the task
    /// running this future panics or is aborted.
    pub async fn process_tracked(&self, file: InputFile, calls: &AtomicU32) -> ItemResult {
        let InputFile {
            name,
            mime_type,
            data,
        } = file;

        self.limiter.acquire().await;

        let payload = match ImagePayload::decode(data, &mime_type) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Image decode failed");
                return ItemResult::failed(&name, ItemError::Decode(e.to_string()).to_string(), 0);
            }
        };
        debug!(
            width = payload.width(),
            height = payload.height(),
            "Decoded image"
        );

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            calls.store(attempts, Ordering::SeqCst);
            match self.call_once(&payload).await {
                Ok(text) => {
                    let result = ItemResult::extracted(&name, &text, attempts);
                    if result.success {
                        info!(attempts, chars = text.len(), "Extraction succeeded");
                    } else {
                        warn!(attempts, "Model returned blank text");
                    }
                    return result;
                }
                Err(e) if e.is_retryable() && attempts <= self.max_retries => {
                    warn!(attempts, error = %e, "Extraction failed, retrying");
                    self.limiter.acquire().await;
                }
                Err(e) => {
                    warn!(attempts, error = %e, "Extraction failed");
                    return ItemResult::failed(&name, ItemError::Inference(e).to_string(), attempts);
                }
            }
        }
    }

    /// [`process`](Self::process), then hand the result to `sink`.
    ///
    /// A storage failure doesn't change the item's outcome; it is recorded
    /// in `storage_error`.
    pub async fn process_and_store(
        &self,
        file: InputFile,
        sink: &ResultSink,
        batch_id: &str,
        prefix: &str,
    ) -> ItemResult {
        let result = self.process(file).await;
        store_result(result, sink, batch_id, prefix).await
    }

    async fn call_once(&self, payload: &ImagePayload) -> Result<String, InferenceError> {
        match tokio::time::timeout(self.timeout, self.inference.extract(&self.prompt, payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout),
        }
    }
}

/// Writes the artifact for `result` and annotates it with the key or the storage error.
pub(crate) async fn store_result(
    result: ItemResult,
    sink: &ResultSink,
    batch_id: &str,
    prefix: &str,
) -> ItemResult {
    match sink.write_item(batch_id, prefix, &result).await {
        Ok(key) => result.with_storage_key(key),
        Err(e) => result.with_storage_error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, ObjectStore};
    use async_trait::async_trait;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn png() -> Vec<u8> {
        let buffer = ImageBuffer::from_pixel(3, 3, Rgb([10u8, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(buffer)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    /// Replays scripted responses in order; records the prompts it saw.
    struct Scripted {
        responses: Mutex<Vec<Result<String, InferenceError>>>,
        calls: AtomicU32,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(mut responses: Vec<Result<String, InferenceError>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl InferenceClient for Scripted {
        async fn extract(&self, prompt: &str, _image: &ImagePayload) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(InferenceError::EmptyResponse))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Hangs;

    #[async_trait]
    impl InferenceClient for Hangs {
        async fn extract(&self, _prompt: &str, _image: &ImagePayload) -> Result<String, InferenceError> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "hangs"
        }
    }

    fn pipeline(client: Arc<dyn InferenceClient>, config: BatchConfig) -> ItemPipeline {
        let limiter = Arc::new(RateLimiter::new(config.max_operations, config.rate_window));
        ItemPipeline::new(client, limiter, &config)
    }

    #[tokio::test]
    async fn test_success_trims_and_uses_prompt() {
        let client = Scripted::new(vec![Ok("  # Invoice 42\n".to_string())]);
        let config = BatchConfig {
            prompt: "custom prompt".to_string(),
            ..BatchConfig::default()
        };

        let result = pipeline(client.clone(), config)
            .process(InputFile::new("a.png", "image/png", png()))
            .await;

        assert!(result.success);
        assert_eq!(result.extracted_markdown.as_deref(), Some("# Invoice 42"));
        assert_eq!(result.attempts, 1);
        assert_eq!(client.prompts.lock().unwrap().as_slice(), ["custom prompt"]);
    }

    #[tokio::test]
    async fn test_decode_failure_skips_remote_call() {
        let client = Scripted::new(vec![Ok("never".to_string())]);

        let result = pipeline(client.clone(), BatchConfig::default())
            .process(InputFile::new("bad.png", "image/png", b"garbage".to_vec()))
            .await;

        assert!(!result.success);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Failed to decode image"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_remote_error_message() {
        let client = Scripted::new(vec![Err(InferenceError::Remote("API error (500)".into()))]);

        let result = pipeline(client, BatchConfig::default())
            .process(InputFile::new("a.png", "image/png", png()))
            .await;

        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("Remote error: API error (500)"));
    }

    #[tokio::test]
    async fn test_empty_response_is_failure() {
        let client = Scripted::new(vec![Ok("   ".to_string())]);
        let result = pipeline(client, BatchConfig::default())
            .process(InputFile::new("a.png", "image/png", png()))
            .await;
        assert!(!result.success);
        assert!(result.is_consistent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let config = BatchConfig {
            request_timeout: Duration::from_secs(2),
            ..BatchConfig::default()
        };

        let result = pipeline(Arc::new(Hangs), config)
            .process(InputFile::new("slow.png", "image/png", png()))
            .await;

        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_retry_on_retryable_error() {
        let client = Scripted::new(vec![
            Err(InferenceError::Remote("503".into())),
            Ok("# ok".to_string()),
        ]);
        let config = BatchConfig {
            max_retries: 2,
            ..BatchConfig::default()
        };

        let result = pipeline(client.clone(), config)
            .process(InputFile::new("a.png", "image/png", png()))
            .await;

        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let client = Scripted::new(vec![
            Err(InferenceError::Remote("503".into())),
            Ok("# ok".to_string()),
        ]);

        let result = pipeline(client.clone(), BatchConfig::default())
            .process(InputFile::new("a.png", "image/png", png()))
            .await;

        assert!(!result.success);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let client = Scripted::new(vec![
            Err(InferenceError::Authentication("bad key".into())),
            Ok("# ok".to_string()),
        ]);
        let config = BatchConfig {
            max_retries: 3,
            ..BatchConfig::default()
        };

        let result = pipeline(client.clone(), config)
            .process(InputFile::new("a.png", "image/png", png()))
            .await;

        assert!(!result.success);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_process_and_store_records_key() {
        let client = Scripted::new(vec![Ok("# A".to_string())]);
        let store = Arc::new(MemoryStore::new("test"));
        let sink = ResultSink::new(store.clone(), Default::default());

        let result = pipeline(client, BatchConfig::default())
            .process_and_store(InputFile::new("a.png", "image/png", png()), &sink, "b1", "p/")
            .await;

        assert_eq!(result.storage_key.as_deref(), Some("p/a.md"));
        assert!(result.storage_error.is_none());
        assert_eq!(store.get("p/a.md").await.unwrap(), b"# A");
    }
}
