//! The remote vision-model collaborator.
//!
//! The batch pipeline only knows the [`InferenceClient`] trait: prompt and
//! decoded image in, text out. [`GeminiClient`] is the production
//! implementation; tests substitute their own.

pub mod gemini;

use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;

pub use gemini::GeminiClient;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// The call exceeded the configured bound.
    #[error("timeout")]
    Timeout,

    /// Credentials were rejected by the service.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Any other failure reported by, or on the way to, the service.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The service answered but the body could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The service answered with no text.
    #[error("Empty response from model")]
    EmptyResponse,

    /// The client could not be constructed.
    #[error("Client setup failed: {0}")]
    Client(String),
}

impl InferenceError {
    /// Whether resubmitting the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceError::Timeout | InferenceError::Remote(_))
    }
}

/// A decoded invoice image together with the bytes it was decoded from.
///
/// Decoding happens before the remote call so that corrupt uploads fail
/// locally; the original encoding is what goes over the wire.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    image: DynamicImage,
    encoded: Vec<u8>,
    mime_type: String,
}

impl ImagePayload {
    pub fn decode(encoded: Vec<u8>, mime_type: &str) -> Result<Self, image::ImageError> {
        let image = image::load_from_memory(&encoded)?;
        Ok(Self {
            image,
            encoded,
            mime_type: mime_type.to_string(),
        })
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Runs the prompt against the image and returns the raw text answer.
    async fn extract(&self, prompt: &str, image: &ImagePayload) -> Result<String, InferenceError>;

    /// Short identifier used in logs (e.g. the model id).
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let buffer = ImageBuffer::from_pixel(width, height, Rgb([255u8, 255, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(buffer)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_valid_png() {
        let bytes = png_bytes(4, 3);
        let payload = ImagePayload::decode(bytes.clone(), "image/png").unwrap();
        assert_eq!(payload.width(), 4);
        assert_eq!(payload.height(), 3);
        assert_eq!(payload.encoded(), bytes.as_slice());
        assert_eq!(payload.mime_type(), "image/png");
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = ImagePayload::decode(b"definitely not an image".to_vec(), "image/png");
        assert!(result.is_err());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(InferenceError::Timeout.is_retryable());
        assert!(InferenceError::Remote("503".into()).is_retryable());
        assert!(!InferenceError::Authentication("bad key".into()).is_retryable());
        assert!(!InferenceError::EmptyResponse.is_retryable());
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(InferenceError::Timeout.to_string(), "timeout");
    }
}
