//! Test harness for isolated batch runs.
//!
//! The `TestHarness` wires a `BatchProcessor` to a scripted inference client
//! and an in-memory store, and keeps handles to both for assertions.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use invoicer::batch::{BatchConfig, BatchProcessor, BatchSummary, InMemoryProgress, InputFile};
use invoicer::storage::{MemoryStore, ObjectStore};

use super::builders::MockInference;

pub struct TestHarness {
    pub inference: Arc<MockInference>,
    pub store: Arc<MemoryStore>,
    pub progress: InMemoryProgress,
    pub processor: BatchProcessor,
}

impl TestHarness {
    /// Default settings with a generous rate limit so timing never matters.
    pub fn new(inference: MockInference) -> Self {
        Self::with_config(inference, Self::fast_config())
    }

    pub fn with_config(inference: MockInference, config: BatchConfig) -> Self {
        let inference = Arc::new(inference);
        let store = Arc::new(MemoryStore::new("test-bucket"));
        let processor = BatchProcessor::new(
            config,
            inference.clone(),
            store.clone() as Arc<dyn ObjectStore>,
        )
        .expect("test config should be valid");

        Self {
            inference,
            store,
            progress: InMemoryProgress::new(),
            processor,
        }
    }

    pub fn fast_config() -> BatchConfig {
        BatchConfig {
            max_operations: 1000,
            rate_window: Duration::from_secs(60),
            request_timeout: Duration::from_secs(5),
            root_prefix: "invoice_processing/".to_string(),
            ..BatchConfig::default()
        }
    }

    pub async fn run(&self, files: Vec<InputFile>) -> BatchSummary {
        self.processor.process_batch(files, &self.progress).await
    }

    pub async fn text(&self, key: &str) -> String {
        String::from_utf8(self.store.get(key).await.expect("object should exist"))
            .expect("object should be UTF-8")
    }
}
