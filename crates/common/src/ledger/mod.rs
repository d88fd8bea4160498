//! Ledger export client
//!
//! Provides:
//! - An OAuth2 client-credentials session backed by the shared token cache
//! - Sales-invoice export with bounded retry on rate limiting
//!
//! The client does not deduplicate exports; the lifecycle guards make sure
//! an invoice is only handed over once.

pub mod wire;

use crate::cache::{keys, KeyValueCache};
use crate::config::LedgerConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::models::InvoiceRecord;
use crate::retry::{retry_with_policy, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Seconds subtracted from the provider expiry when caching a token
const TOKEN_TTL_MARGIN_SECS: u64 = 60;

/// A token expiring within this window is refreshed eagerly
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// Successful export handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerExportReceipt {
    pub external_id: String,
    pub external_url: String,
}

/// Ledger seam the lifecycle depends on
#[async_trait]
pub trait LedgerExporter: Send + Sync {
    async fn export(&self, record: &InvoiceRecord) -> Result<LedgerExportReceipt>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS)
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    7200
}

/// HTTP ledger client
pub struct LedgerClient {
    http: reqwest::Client,
    config: LedgerConfig,
    cache: Arc<dyn KeyValueCache>,
    retry_policy: RetryPolicy,
}

impl LedgerClient {
    pub fn new(config: LedgerConfig, cache: Arc<dyn KeyValueCache>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            config,
            cache,
            retry_policy: RetryPolicy::ledger(),
        }
    }

    /// Read a still-fresh token from the shared cache, if any
    async fn cached_token(&self) -> Option<String> {
        let raw = match self.cache.get(&keys::ledger_token()).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Token cache read failed, re-authenticating");
                return None;
            }
        };

        let hit = raw
            .as_deref()
            .and_then(|json| match serde_json::from_str::<CachedToken>(json) {
                Ok(token) if token.is_fresh(Utc::now()) => Some(token.access_token),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable cached token");
                    None
                }
            });

        metrics::record_token_cache(hit.is_some());
        if hit.is_some() {
            debug!("Ledger token served from cache");
        }
        hit
    }

    async fn store_token(&self, token: &CachedToken, expires_in: u64) {
        let ttl = expires_in.saturating_sub(TOKEN_TTL_MARGIN_SECS);
        match serde_json::to_string(token) {
            Ok(json) => {
                if let Err(e) = self
                    .cache
                    .set_with_ttl(&keys::ledger_token(), &json, ttl)
                    .await
                {
                    warn!(error = %e, "Failed to cache ledger token, continuing without cache");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize ledger token"),
        }
    }

    /// Exchange client credentials for a bearer token
    async fn request_token(&self) -> Result<TokenResponse> {
        let url = format!("{}/oauth/token", self.config.base_url);
        let request = TokenRequest {
            grant_type: "client_credentials",
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
        };

        let response = self.http.post(&url).form(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LedgerApi {
                status,
                body: format!("authentication failed: {}", body),
            });
        }

        response.json().await.map_err(|e| AppError::LedgerApi {
            status: 200,
            body: format!("invalid token response: {}", e),
        })
    }

    /// Get a usable bearer token, refreshing through the shared cache.
    ///
    /// Concurrent exporters prefer the cached token; a thundering herd on
    /// expiry re-authenticates redundantly but harmlessly.
    async fn authenticate(&self) -> Result<String> {
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        info!("Authenticating with ledger (client credentials)");
        let response = retry_with_policy(
            &self.retry_policy,
            |err| matches!(err, AppError::HttpClient(_)),
            || self.request_token(),
        )
        .await?;

        let token = CachedToken {
            access_token: response.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(response.expires_in as i64),
        };
        self.store_token(&token, response.expires_in).await;

        info!(expires_in = response.expires_in, "Ledger authentication succeeded");
        Ok(response.access_token)
    }

    /// One export POST. 429 maps to the dedicated rate-limit error carrying
    /// the server's Retry-After hint; every other non-2xx surfaces as-is.
    async fn post_export(
        &self,
        payload: &wire::SalesInvoiceEnvelope,
    ) -> Result<wire::LedgerCreateResponse> {
        let token = self.authenticate().await?;
        let url = format!(
            "{}/{}/sales_invoices",
            self.config.base_url, self.config.company_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok())
                .unwrap_or(60);
            warn!(retry_after_secs, "Ledger rate limit hit");
            return Err(AppError::LedgerRateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LedgerApi {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| AppError::LedgerApi {
            status: status.as_u16(),
            body: format!("invalid export response: {}", e),
        })
    }

    /// Token round-trip as a connectivity probe
    pub async fn health_check(&self) -> bool {
        match self.authenticate().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Ledger health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl LedgerExporter for LedgerClient {
    #[instrument(skip(self, record), fields(invoice_id = %record.id))]
    async fn export(&self, record: &InvoiceRecord) -> Result<LedgerExportReceipt> {
        if record.extracted_data.is_none() {
            return Err(AppError::MissingExtractedData { id: record.id });
        }

        let payload = wire::build_payload(record, Utc::now().date_naive(), self.config.due_days)?;

        // Only the rate-limit error is retried here; 4xx/5xx surface at once.
        let response = retry_with_policy(
            &self.retry_policy,
            |err| matches!(err, AppError::LedgerRateLimited { .. }),
            || self.post_export(&payload),
        )
        .await?;

        let external_id = response.data.id;
        let external_url = format!(
            "{}/{}/sales_invoices/{}",
            self.config.base_url, self.config.company_id, external_id
        );

        info!(ledger_id = %external_id, "Invoice exported to ledger");
        Ok(LedgerExportReceipt {
            external_id,
            external_url,
        })
    }
}

/// Counting mock exporter for tests
pub struct MockLedger {
    calls: std::sync::atomic::AtomicUsize,
    fail: bool,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            calls: std::sync::atomic::AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: std::sync::atomic::AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerExporter for MockLedger {
    async fn export(&self, record: &InvoiceRecord) -> Result<LedgerExportReceipt> {
        let call = self
            .calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;

        if self.fail {
            return Err(AppError::LedgerApi {
                status: 502,
                body: "mock ledger failure".to_string(),
            });
        }
        if record.extracted_data.is_none() {
            return Err(AppError::MissingExtractedData { id: record.id });
        }

        Ok(LedgerExportReceipt {
            external_id: format!("mock-{}", call),
            external_url: format!("https://ledger.example/invoices/mock-{}", call),
        })
    }
}
