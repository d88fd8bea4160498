//! Invoice entity and lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::extracted::ExtractedInvoiceData;

/// Lifecycle status of an invoice
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
    Exported,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Uploaded => "uploaded",
            InvoiceStatus::Processing => "processing",
            InvoiceStatus::Completed => "completed",
            InvoiceStatus::Failed => "failed",
            InvoiceStatus::Exported => "exported",
        }
    }

    /// Terminal for the normal flow. A failed invoice may still be
    /// resubmitted by explicit user action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Exported | InvoiceStatus::Failed)
    }

    /// Processing may start fresh from upload, or as a resubmission of a
    /// failed invoice.
    pub fn can_begin_processing(&self) -> bool {
        matches!(self, InvoiceStatus::Uploaded | InvoiceStatus::Failed)
    }

    pub fn can_export(&self) -> bool {
        matches!(self, InvoiceStatus::Completed)
    }

    /// Manual correction window: after processing finished, before export.
    pub fn can_edit(&self) -> bool {
        matches!(self, InvoiceStatus::Completed | InvoiceStatus::Failed)
    }
}

impl From<String> for InvoiceStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => InvoiceStatus::Processing,
            "completed" => InvoiceStatus::Completed,
            "failed" => InvoiceStatus::Failed,
            "exported" => InvoiceStatus::Exported,
            _ => InvoiceStatus::Uploaded,
        }
    }
}

impl From<InvoiceStatus> for String {
    fn from(status: InvoiceStatus) -> Self {
        status.as_str().to_string()
    }
}

/// A user-owned invoice document moving through the pipeline
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub user_id: Uuid,

    // Source metadata
    pub original_filename: String,
    /// Opaque reference into the file storage collaborator
    pub file_ref: String,
    pub file_size: u64,
    pub mime_type: String,

    // Lifecycle
    pub status: InvoiceStatus,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub exported_at: Option<DateTime<Utc>>,

    // Recognition output
    pub recognized_text: Option<String>,
    pub confidence_score: Option<f64>,

    // Financial output. Present only once the invoice completed processing.
    pub extracted_data: Option<ExtractedInvoiceData>,
    pub is_manually_corrected: bool,
    /// Set when extraction fell back to an empty record and a human has to
    /// review the invoice before it is trustworthy.
    pub requires_review: bool,
    pub processing_time_seconds: Option<f64>,

    // Failure output
    pub error_message: Option<String>,

    // Export linkage
    pub ledger_invoice_id: Option<String>,
    pub exported: bool,
}

impl InvoiceRecord {
    /// Create a freshly uploaded invoice
    pub fn new_upload(
        user_id: Uuid,
        original_filename: &str,
        file_ref: &str,
        file_size: u64,
        mime_type: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            original_filename: original_filename.to_string(),
            file_ref: file_ref.to_string(),
            file_size,
            mime_type: mime_type.to_string(),
            status: InvoiceStatus::Uploaded,
            uploaded_at: now,
            updated_at: now,
            exported_at: None,
            recognized_text: None,
            confidence_score: None,
            extracted_data: None,
            is_manually_corrected: false,
            requires_review: false,
            processing_time_seconds: None,
            error_message: None,
            ledger_invoice_id: None,
            exported: false,
        }
    }

    /// Bump the modification timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
