//! Error types for the invoice pipeline
//!
//! Provides:
//! - A single taxonomy shared by every pipeline stage
//! - Distinct variants for locally-recovered vs surfaced failures
//! - Transience checks used by the retry combinator

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Extraction errors
    #[error("recognized text is empty")]
    EmptyInput,

    #[error("language model error: {message}")]
    Completion { message: String },

    #[error("extraction failed after {attempts} attempts: {message}")]
    ExtractionFailed { attempts: u32, message: String },

    // Recognition errors
    #[error("recognition failed: {message}")]
    Recognition { message: String },

    // Ledger errors
    #[error("ledger API error {status}: {body}")]
    LedgerApi { status: u16, body: String },

    #[error("ledger rate limit exceeded, retry after {retry_after_secs}s")]
    LedgerRateLimited { retry_after_secs: u64 },

    // Lifecycle errors
    #[error("processing exceeded the {seconds}s budget")]
    Timeout { seconds: u64 },

    #[error("invoice not found: {id}")]
    NotFound { id: Uuid },

    #[error("invoice {id} is {status}, cannot {operation}")]
    InvalidStatus {
        id: Uuid,
        status: String,
        operation: &'static str,
    },

    #[error("invoice {id} has no extracted data to export")]
    MissingExtractedData { id: Uuid },

    // Infrastructure errors
    #[error("cache error: {message}")]
    Cache { message: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Whether the failure is a transport-level hiccup worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::HttpClient(_) | AppError::LedgerRateLimited { .. }
        )
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Cache {
            message: err.to_string(),
        }
    }
}
