//! Google Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{ImagePayload, InferenceClient, InferenceError};
use crate::config::InferenceConfig;
use crate::error::ConfigError;
use crate::sanitize::truncate_for_log;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GeminiClient {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Builds a client for `model` at `base_url`.
    ///
    /// Fails if the key is blank; a batch must never start with a credential
    /// that is known to be unusable.
    pub fn new(api_key: SecretString, model: &str, base_url: &str) -> Result<Self, InferenceError> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(InferenceError::Authentication(
                "Gemini API key is empty".to_string(),
            ));
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::Client(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolves the configured credential and builds the client.
    pub fn from_config(config: &InferenceConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .resolve()
            .map_err(|e| ConfigError::MissingCredential {
                name: format!("inference API key ({})", e),
            })?;

        Self::new(api_key, &config.model, &config.endpoint).map_err(|e| {
            ConfigError::MissingCredential {
                name: format!("inference API key ({})", e),
            }
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(prompt: &str, image: &ImagePayload) -> GenerateRequest {
        let data = base64::engine::general_purpose::STANDARD.encode(image.encoded());
        GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part::Text {
                        text: prompt.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type().to_string(),
                            data,
                        },
                    },
                ],
            }],
        }
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn extract(&self, prompt: &str, image: &ImagePayload) -> Result<String, InferenceError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = Self::build_request(prompt, image);

        debug!(
            model = %self.model,
            mime_type = image.mime_type(),
            bytes = image.encoded().len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout
                } else {
                    InferenceError::Remote(format!("Network error: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let error_text = truncate_for_log(&error_text);
            error!(status = %status, error = %error_text, "Gemini API returned error status");

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    InferenceError::Authentication(format!("API error ({}): {}", status, error_text))
                }
                _ => InferenceError::Remote(format!("API error ({}): {}", status, error_text)),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        parsed.into_text()
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        inline_data: InlineData,
    },
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason", default)]
    block_reason: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    fn into_text(self) -> Result<String, InferenceError> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(InferenceError::InvalidResponse(format!(
                "No content in API response: {}",
                reason
            )));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text),
                _ => None,
            })
            .collect();

        if text.trim().is_empty() {
            debug!(finish_reason = ?candidate.finish_reason, "Candidate carried no text");
            return Err(InferenceError::EmptyResponse);
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn payload() -> ImagePayload {
        let buffer = ImageBuffer::from_pixel(2, 2, Rgb([0u8, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(buffer)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        ImagePayload::decode(out.into_inner(), "image/png").unwrap()
    }

    fn client(base_url: &str) -> GeminiClient {
        GeminiClient::new(SecretString::from("test-key"), "test-model", base_url).unwrap()
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = GeminiClient::new(SecretString::from("  "), "m", "http://localhost");
        assert!(matches!(result, Err(InferenceError::Authentication(_))));
    }

    #[test]
    fn test_request_serialization() {
        let request = GeminiClient::build_request("Extract", &payload());
        let json = serde_json::to_value(&request).unwrap();

        let parts = &json["contents"][0]["parts"];
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(parts[0]["text"], "Extract");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert!(parts[1]["inline_data"]["data"].as_str().unwrap().len() > 10);
    }

    #[test]
    fn test_response_joins_text_parts() {
        let json = r##"{"candidates":[{"content":{"role":"model","parts":[{"text":"# Invoice"},{"text":"\nTotal: 10"}]},"finishReason":"STOP"}]}"##;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.into_text().unwrap(), "# Invoice\nTotal: 10");
    }

    #[test]
    fn test_blocked_prompt() {
        let json = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        match response.into_text() {
            Err(InferenceError::InvalidResponse(msg)) => assert!(msg.contains("SAFETY")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_blank_candidate_is_empty_response() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"   "}]}}]}"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.into_text(), Err(InferenceError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_extract_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/test-model:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r##"{"candidates":[{"content":{"parts":[{"text":"# Invoice\n| a | b |"}]}}]}"##)
            .create_async()
            .await;

        let text = client(&server.url())
            .extract("Extract", &payload())
            .await
            .unwrap();

        assert_eq!(text, "# Invoice\n| a | b |");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_extract_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/test-model:generateContent")
            .with_status(403)
            .with_body(r#"{"error":{"message":"API key not valid"}}"#)
            .create_async()
            .await;

        let result = client(&server.url()).extract("Extract", &payload()).await;
        assert!(matches!(result, Err(InferenceError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_extract_server_error_is_remote() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/test-model:generateContent")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        match client(&server.url()).extract("Extract", &payload()).await {
            Err(InferenceError::Remote(msg)) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("overloaded"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
