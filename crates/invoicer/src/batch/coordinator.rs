use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{validate_config, Config};
use crate::error::{ConfigError, InvoicerError};
use crate::inference::{GeminiClient, InferenceClient};
use crate::storage::{open_store, ObjectStore, ResultSink};

use super::config::BatchConfig;
use super::job::{BatchJob, InputFile};
use super::pipeline::{store_result, ItemPipeline};
use super::progress::{ProgressEvent, ProgressReporter};
use super::rate_limiter::RateLimiter;
use super::result::{BatchSummary, ItemResult};

/// Everything a finished batch produced.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub summary: BatchSummary,
    /// Full per-item results (including extracted markdown), in submission order.
    pub results: Vec<ItemResult>,
    /// Key of the stored summary, if writing it succeeded.
    pub summary_key: Option<String>,
}

/// Fans a batch of files out to concurrent item tasks and collects the results.
///
/// The rate limiter is shared by every batch this processor runs.
pub struct BatchProcessor {
    pipeline: Arc<ItemPipeline>,
    sink: ResultSink,
    config: BatchConfig,
}

impl BatchProcessor {
    /// Production constructor: resolves credentials, opens the configured
    /// store and builds the Gemini client. Fails before any work starts.
    pub fn from_config(config: &Config) -> Result<Self, InvoicerError> {
        validate_config(config)?;
        let inference: Arc<dyn InferenceClient> =
            Arc::new(GeminiClient::from_config(&config.inference)?);
        let store = open_store(&config.storage)?;

        info!(
            model = %config.inference.model,
            bucket = store.bucket(),
            max_operations = config.rate_limit.max_operations,
            window_secs = config.rate_limit.window_secs,
            "Batch processor ready"
        );

        Ok(Self::new(BatchConfig::from_config(config), inference, store)?)
    }

    /// Inject specific collaborators. Fails if `config` is out of bounds.
    pub fn new(
        config: BatchConfig,
        inference: Arc<dyn InferenceClient>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::new(config.max_operations, config.rate_window));
        let pipeline = Arc::new(ItemPipeline::new(inference, limiter, &config));
        let sink = ResultSink::new(store, config.key_disambiguation);

        Ok(Self {
            pipeline,
            sink,
            config,
        })
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(self.sink.store())
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Processes `files` and returns the summary. Never fails: item, task and
    /// storage failures all end up inside the summary.
    pub async fn process_batch(
        &self,
        files: Vec<InputFile>,
        progress: &dyn ProgressReporter,
    ) -> BatchSummary {
        self.process_batch_detailed(files, progress).await.summary
    }

    /// Like [`process_batch`](Self::process_batch) but also returns the
    /// per-item results with their extracted text.
    pub async fn process_batch_detailed(
        &self,
        files: Vec<InputFile>,
        progress: &dyn ProgressReporter,
    ) -> BatchOutcome {
        let job = BatchJob::new(files);
        let span = info_span!("batch", batch_id = %job.batch_id, total_files = job.items.len());
        self.run(job, progress).instrument(span).await
    }

    async fn run(&self, job: BatchJob, progress: &dyn ProgressReporter) -> BatchOutcome {
        let prefix = job.storage_prefix(&self.config.root_prefix);
        let batch_id = job.batch_id.clone();
        let created_at = job.created_at;
        let total_files = job.items.len();

        let (eligible, skipped) = job.partition();
        for name in &skipped {
            warn!(file_name = %name, "Skipping non-image file");
        }

        let total = eligible.len();
        info!(eligible = total, skipped = skipped.len(), prefix = %prefix, "Batch started");
        progress.report(ProgressEvent::Started {
            batch_id: batch_id.clone(),
            total,
        });

        let names: Vec<String> = eligible.iter().map(|f| f.name.clone()).collect();
        let mut in_flight = FuturesUnordered::new();

        // Remote calls started per slot, still readable after a task fault.
        let calls: Vec<Arc<AtomicU32>> = (0..total).map(|_| Arc::new(AtomicU32::new(0))).collect();

        for (slot, file) in eligible.into_iter().enumerate() {
            let pipeline = Arc::clone(&self.pipeline);
            let sink = self.sink.clone();
            let batch_id = batch_id.clone();
            let prefix = prefix.clone();
            let calls = Arc::clone(&calls[slot]);
            let span = info_span!("item", batch_id = %batch_id, file_name = %file.name);

            let handle = tokio::spawn(
                async move {
                    let result = pipeline.process_tracked(file, &calls).await;
                    store_result(result, &sink, &batch_id, &prefix).await
                }
                .instrument(span),
            );
            in_flight.push(async move { (slot, handle.await) });
        }

        let mut slots: Vec<Option<ItemResult>> = vec![None; total];
        let mut completed = 0;

        while let Some((slot, joined)) = in_flight.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    let detail = describe_join_error(e);
                    error!(file_name = %names[slot], error = %detail, "Item task failed");
                    let attempts = calls[slot].load(Ordering::SeqCst);
                    let fault = ItemResult::fault(&names[slot], &detail, attempts);
                    store_result(fault, &self.sink, &batch_id, &prefix).await
                }
            };

            completed += 1;
            let message = match &result.error_message {
                None => format!("Processed {}", result.file_name),
                Some(e) => format!("Failed {}: {}", result.file_name, e),
            };
            progress.report(ProgressEvent::ItemCompleted {
                batch_id: batch_id.clone(),
                file_name: result.file_name.clone(),
                success: result.success,
                completed,
                total,
                message,
            });
            slots[slot] = Some(result);
        }

        // All tasks have resolved; aggregate in submission order.
        let results: Vec<ItemResult> = slots
            .into_iter()
            .zip(&names)
            .map(|(result, name)| {
                result.unwrap_or_else(|| ItemResult::fault(name, "task did not report a result", 0))
            })
            .collect();

        let summary =
            BatchSummary::from_results(&batch_id, created_at, total_files, &prefix, &results, skipped);

        let summary_key = match self.sink.write_summary(&prefix, &summary).await {
            Ok(key) => Some(key),
            Err(e) => {
                error!(error = %e, "Failed to store batch summary");
                None
            }
        };

        progress.report(ProgressEvent::Finished {
            batch_id: batch_id.clone(),
            successful: summary.successful,
            failed: summary.failed,
            total,
        });
        info!(
            successful = summary.successful,
            failed = summary.failed,
            skipped = summary.skipped.len(),
            "Batch finished"
        );

        BatchOutcome {
            summary,
            results,
            summary_key,
        }
    }
}

fn describe_join_error(e: tokio::task::JoinError) -> String {
    if e.is_cancelled() {
        return "task was cancelled".to_string();
    }
    match e.try_into_panic() {
        Ok(payload) => format!("task panicked: {}", panic_message(payload.as_ref())),
        Err(e) => e.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_describe_join_error_panic() {
        let handle = tokio::spawn(async {
            panic!("boom");
        });
        let err = handle.await.unwrap_err();
        assert_eq!(describe_join_error(err), "task panicked: boom");
    }

    #[tokio::test]
    async fn test_describe_join_error_cancelled() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let err = handle.await.unwrap_err();
        assert_eq!(describe_join_error(err), "task was cancelled");
    }

    #[test]
    fn test_panic_message_formatted() {
        let payload: Box<dyn Any + Send> = Box::new(format!("item {}", 3));
        assert_eq!(panic_message(payload.as_ref()), "item 3");
    }
}
