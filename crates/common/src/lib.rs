//! FaturaForge Common Library
//!
//! Shared code for the invoice pipeline including:
//! - Error taxonomy and configuration management
//! - Invoice entity and extracted financial record
//! - KDV (VAT) computation and validation engine
//! - Service seams (recognition, completion, storage, cache) with test doubles
//! - Ledger export client and wire format

pub mod cache;
pub mod completion;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod recognition;
pub mod retry;
pub mod store;
pub mod tax;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use models::{ExtractedInvoiceData, InvoiceRecord, InvoiceStatus};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default invoice currency
pub const DEFAULT_CURRENCY: &str = "TRY";
