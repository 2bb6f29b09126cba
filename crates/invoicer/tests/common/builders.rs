//! Fixture builders and mock collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use tokio::time::Instant;

use invoicer::batch::InputFile;
use invoicer::error::StorageError;
use invoicer::inference::{ImagePayload, InferenceClient, InferenceError};
use invoicer::storage::{Listing, MemoryStore, ObjectMetadata, ObjectStore};

/// Encodes a solid-colour PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let buffer = ImageBuffer::from_pixel(width, height, Rgb([240u8, 240, 240]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(buffer)
        .write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode PNG fixture");
    out.into_inner()
}

/// An eligible PNG input. `width` doubles as the key `MockInference` scripts on.
pub fn png_input(name: &str, width: u32) -> InputFile {
    InputFile::new(name, "image/png", png_bytes(width, 4))
}

pub fn text_input(name: &str, text: &str) -> InputFile {
    InputFile::new(name, "text/plain", text.as_bytes().to_vec())
}

/// What the mock model does for a given image.
#[derive(Clone)]
pub enum Behavior {
    Respond(String),
    RespondAfter(Duration, String),
    Fail(InferenceError),
    Panic(String),
    Hang,
}

/// Scriptable `InferenceClient`.
///
/// Behaviour is picked by image width so one client can treat items of the
/// same batch differently. Tracks call count, concurrency high-water mark and
/// the (tokio) instant of every call.
pub struct MockInference {
    default: Behavior,
    by_width: HashMap<u32, Behavior>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl MockInference {
    pub fn responding(text: &str) -> Self {
        Self::with_default(Behavior::Respond(text.to_string()))
    }

    pub fn with_default(default: Behavior) -> Self {
        Self {
            default,
            by_width: HashMap::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub fn on_width(mut self, width: u32, behavior: Behavior) -> Self {
        self.by_width.insert(width, behavior);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceClient for MockInference {
    async fn extract(&self, _prompt: &str, image: &ImagePayload) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let behavior = self
            .by_width
            .get(&image.width())
            .unwrap_or(&self.default)
            .clone();

        match behavior {
            Behavior::Respond(text) => Ok(text),
            Behavior::RespondAfter(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Behavior::Fail(e) => Err(e),
            Behavior::Panic(message) => panic!("{}", message),
            Behavior::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Wraps a `MemoryStore` and rejects `put` for keys ending with any of the given suffixes.
pub struct FailingStore {
    inner: MemoryStore,
    failing_suffixes: Vec<String>,
    rejected: Mutex<Vec<String>>,
}

impl FailingStore {
    pub fn failing_on(suffixes: &[&str]) -> Self {
        Self {
            inner: MemoryStore::new("failing"),
            failing_suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
            rejected: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn rejected(&self) -> Vec<String> {
        self.rejected.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        if self.failing_suffixes.iter().any(|s| key.ends_with(s.as_str())) {
            self.rejected.lock().unwrap().push(key.to_string());
            return Err(StorageError::Backend {
                key: key.to_string(),
                message: "simulated outage".to_string(),
            });
        }
        self.inner.put(key, body, content_type, metadata).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing, StorageError> {
        self.inner.list(prefix, delimiter).await
    }

    fn bucket(&self) -> &str {
        self.inner.bucket()
    }
}

/// Convenience to share a mock with the processor and keep a handle for assertions.
pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
