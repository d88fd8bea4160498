//! Configuration management for the invoice pipeline
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{env}.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Lifecycle / worker configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Text recognition service configuration
    #[serde(default)]
    pub recognition: RecognitionConfig,

    /// Language model extraction configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// External ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Redis configuration (shared token cache)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Wall-clock ceiling for a single invoice's processing job, in seconds
    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_secs: u64,

    /// How often the worker looks for uploaded invoices, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecognitionConfig {
    /// Base URL of the recognition service
    #[serde(default = "default_recognition_url")]
    pub base_url: String,

    /// Bearer token for the recognition service, if it requires one
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_recognition_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    /// API base URL of the completion provider
    #[serde(default = "default_extraction_api_base")]
    pub api_base: String,

    /// API key for the completion provider
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_extraction_model")]
    pub model: String,

    /// Completion token budget per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt (2 means 3 attempts in total)
    #[serde(default = "default_extraction_retries")]
    pub max_retries: u32,

    /// Sampling temperature of the first attempt; each retry adds 0.2
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f32,

    /// Pause between extraction attempts, in milliseconds
    #[serde(default = "default_retry_pause_ms")]
    pub retry_pause_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Base URL of the ledger API
    #[serde(default = "default_ledger_url")]
    pub base_url: String,

    /// OAuth2 client id
    #[serde(default)]
    pub client_id: String,

    /// OAuth2 client secret
    #[serde(default)]
    pub client_secret: String,

    /// Company scope all ledger endpoints are nested under
    #[serde(default)]
    pub company_id: String,

    /// Fallback payment term applied when an invoice has no due date
    #[serde(default = "default_due_days")]
    pub due_days: i64,

    /// Request timeout in seconds
    #[serde(default = "default_ledger_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_processing_timeout() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    5
}
fn default_recognition_url() -> String {
    "http://localhost:8900".to_string()
}
fn default_recognition_timeout() -> u64 {
    120
}
fn default_extraction_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_extraction_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_extraction_timeout() -> u64 {
    60
}
fn default_extraction_retries() -> u32 {
    2
}
fn default_initial_temperature() -> f32 {
    0.1
}
fn default_retry_pause_ms() -> u64 {
    1000
}
fn default_ledger_url() -> String {
    "https://api.parasut.com/v4".to_string()
}
fn default_due_days() -> i64 {
    30
}
fn default_ledger_timeout() -> u64 {
    30
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_key_prefix() -> String {
    "faturaforge".to_string()
}
fn default_redis_ttl() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    true
}
fn default_service_name() -> String {
    "faturaforge".to_string()
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__LEDGER__CLIENT_ID=...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the processing wall-clock budget as Duration
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.processing_timeout_secs)
    }

    /// Get the worker poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.poll_interval_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            processing_timeout_secs: default_processing_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            base_url: default_recognition_url(),
            api_key: None,
            timeout_secs: default_recognition_timeout(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_base: default_extraction_api_base(),
            api_key: None,
            model: default_extraction_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_extraction_timeout(),
            max_retries: default_extraction_retries(),
            initial_temperature: default_initial_temperature(),
            retry_pause_ms: default_retry_pause_ms(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: default_ledger_url(),
            client_id: String::new(),
            client_secret: String::new(),
            company_id: String::new(),
            due_days: default_due_days(),
            timeout_secs: default_ledger_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            default_ttl_secs: default_redis_ttl(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            recognition: RecognitionConfig::default(),
            extraction: ExtractionConfig::default(),
            ledger: LedgerConfig::default(),
            redis: RedisConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
