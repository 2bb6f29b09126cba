use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// Events emitted by the batch coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        batch_id: String,
        /// Number of eligible files that will be processed.
        total: usize,
    },
    ItemCompleted {
        batch_id: String,
        file_name: String,
        success: bool,
        completed: usize,
        total: usize,
        message: String,
    },
    Finished {
        batch_id: String,
        successful: usize,
        failed: usize,
        total: usize,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for callers that don't care.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// `(completed, total, last_message)` plus outcome counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub completed: usize,
    pub total: usize,
    pub last_message: String,
    pub successful: usize,
    pub failed: usize,
    pub finished: bool,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            batch_id: None,
            completed: 0,
            total: 0,
            last_message: "starting".to_string(),
            successful: 0,
            failed: 0,
            finished: false,
        }
    }
}

impl ProgressSnapshot {
    fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { batch_id, total } => {
                *self = Self {
                    batch_id: Some(batch_id.clone()),
                    total: *total,
                    ..Self::default()
                };
            }
            ProgressEvent::ItemCompleted {
                success,
                completed,
                total,
                message,
                ..
            } => {
                self.completed = *completed;
                self.total = *total;
                self.last_message = message.clone();
                if *success {
                    self.successful += 1;
                } else {
                    self.failed += 1;
                }
            }
            ProgressEvent::Finished {
                successful,
                failed,
                total,
                ..
            } => {
                self.completed = *total;
                self.total = *total;
                self.successful = *successful;
                self.failed = *failed;
                self.last_message = "complete".to_string();
                self.finished = true;
            }
        }
    }
}

/// Keeps the latest state in memory for polling (`snapshot()`).
#[derive(Default)]
pub struct InMemoryProgress {
    state: RwLock<ProgressSnapshot>,
}

impl InMemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl ProgressReporter for InMemoryProgress {
    fn report(&self, event: ProgressEvent) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.apply(&event);
    }
}

/// Forwards events to a broadcast channel (for live UIs).
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl BroadcastProgress {
    pub fn new(sender: Arc<broadcast::Sender<ProgressEvent>>) -> Self {
        Self { sender }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self::new(Arc::new(sender))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

/// Rewrites a JSON snapshot file after every event so another process can poll it.
pub struct FileProgress {
    path: PathBuf,
    state: Mutex<ProgressSnapshot>,
}

impl FileProgress {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(ProgressSnapshot::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, snapshot: &ProgressSnapshot) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)
    }
}

impl ProgressReporter for FileProgress {
    fn report(&self, event: ProgressEvent) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.apply(&event);
        if let Err(e) = self.write(&state) {
            warn!(path = %self.path.display(), error = %e, "Failed to write progress file");
        }
    }
}

/// Fans events out to several reporters.
#[derive(Default)]
pub struct CompositeProgress {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl CompositeProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn push(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.reporters.push(reporter);
    }
}

impl ProgressReporter for CompositeProgress {
    fn report(&self, event: ProgressEvent) {
        if let Some((last, rest)) = self.reporters.split_last() {
            for reporter in rest {
                reporter.report(event.clone());
            }
            last.report(event);
        }
    }
}

impl<T: ProgressReporter + ?Sized> ProgressReporter for Arc<T> {
    fn report(&self, event: ProgressEvent) {
        (**self).report(event);
    }
}
