//! FaturaForge Pipeline Library
//!
//! Structured extraction and invoice lifecycle processing on top of the
//! service seams in `faturaforge-common`.

pub mod extractor;
pub mod processor;

// Re-export commonly used types
pub use extractor::{ExtractionOutcome, StructuredExtractor};
pub use processor::InvoiceProcessor;
