//! Domain models shared across the pipeline

pub mod extracted;
pub mod invoice;

pub use extracted::{ExtractedInvoiceData, InvoiceCorrection, LineItem};
pub use invoice::{InvoiceRecord, InvoiceStatus};
