//! Text recognition service client
//!
//! Recognition is consumed as a black box: document bytes in, recognized
//! text plus a confidence score out. The pipeline makes no assumption about
//! the failure cause beyond transient wording in the message.

use crate::config::RecognitionConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Output of a recognition call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedDocument {
    pub text: String,
    /// Mean page confidence in [0, 1]
    pub confidence: f64,
    pub page_count: u32,
}

/// Recognition service seam
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, content: &[u8], mime_type: &str) -> Result<RecognizedDocument>;
}

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    content: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    text: String,
    confidence: f64,
    #[serde(default = "default_page_count")]
    page_count: u32,
}

fn default_page_count() -> u32 {
    1
}

/// HTTP recognition client posting base64 document content
pub struct HttpRecognizer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRecognizer {
    pub fn new(config: &RecognitionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl TextRecognizer for HttpRecognizer {
    async fn recognize(&self, content: &[u8], mime_type: &str) -> Result<RecognizedDocument> {
        let url = format!("{}/recognize", self.base_url);
        let request = RecognizeRequest {
            content: base64::engine::general_purpose::STANDARD.encode(content),
            mime_type,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| AppError::Recognition {
            message: format!("request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Recognition {
                message: format!("service error {}: {}", status, body),
            });
        }

        let result: RecognizeResponse =
            response.json().await.map_err(|e| AppError::Recognition {
                message: format!("invalid response: {}", e),
            })?;

        debug!(
            confidence = result.confidence,
            pages = result.page_count,
            chars = result.text.len(),
            "Document recognized"
        );

        Ok(RecognizedDocument {
            text: result.text,
            confidence: result.confidence,
            page_count: result.page_count,
        })
    }
}

/// Scripted recognizer for tests
pub struct MockRecognizer {
    document: Option<RecognizedDocument>,
    error: Option<String>,
}

impl MockRecognizer {
    pub fn succeeding(text: &str, confidence: f64) -> Self {
        Self {
            document: Some(RecognizedDocument {
                text: text.to_string(),
                confidence,
                page_count: 1,
            }),
            error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            document: None,
            error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl TextRecognizer for MockRecognizer {
    async fn recognize(&self, _content: &[u8], _mime_type: &str) -> Result<RecognizedDocument> {
        if let Some(message) = &self.error {
            return Err(AppError::Recognition {
                message: message.clone(),
            });
        }
        Ok(self
            .document
            .clone()
            .expect("mock recognizer configured without a document"))
    }
}
