//! Invoice lifecycle processing
//!
//! Drives a single invoice through its states:
//! Uploaded -> Processing -> Completed | Failed -> Exported.
//! Progress and error detail are persisted at every transition; a failed
//! invoice never keeps partial financial data.

use crate::extractor::{ExtractionOutcome, StructuredExtractor};
use chrono::Utc;
use faturaforge_common::config::PipelineConfig;
use faturaforge_common::errors::{AppError, Result};
use faturaforge_common::ledger::{LedgerExportReceipt, LedgerExporter};
use faturaforge_common::metrics;
use faturaforge_common::models::{
    ExtractedInvoiceData, InvoiceCorrection, InvoiceRecord, InvoiceStatus,
};
use faturaforge_common::recognition::{RecognizedDocument, TextRecognizer};
use faturaforge_common::store::{FileStorage, InvoiceStore};
use faturaforge_common::tax;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Orchestrates recognition, extraction, correction and export for one
/// invoice at a time. Every collaborator is injected once at construction.
pub struct InvoiceProcessor {
    store: Arc<dyn InvoiceStore>,
    files: Arc<dyn FileStorage>,
    recognizer: Arc<dyn TextRecognizer>,
    extractor: StructuredExtractor,
    ledger: Arc<dyn LedgerExporter>,
    config: PipelineConfig,
}

impl InvoiceProcessor {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        files: Arc<dyn FileStorage>,
        recognizer: Arc<dyn TextRecognizer>,
        extractor: StructuredExtractor,
        ledger: Arc<dyn LedgerExporter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            files,
            recognizer,
            extractor,
            ledger,
            config,
        }
    }

    async fn fetch(&self, id: Uuid) -> Result<InvoiceRecord> {
        self.store
            .get(id)
            .await?
            .ok_or(AppError::NotFound { id })
    }

    /// Move an uploaded (or resubmitted failed) invoice into processing
    pub async fn begin_processing(&self, id: Uuid) -> Result<InvoiceRecord> {
        let mut record = self.fetch(id).await?;
        if !record.status.can_begin_processing() {
            return Err(AppError::InvalidStatus {
                id,
                status: record.status.as_str().to_string(),
                operation: "begin processing",
            });
        }

        record.status = InvoiceStatus::Processing;
        record.error_message = None;
        record.touch();
        self.store.update(&record).await?;

        info!(invoice_id = %id, "Invoice moved to processing");
        Ok(record)
    }

    /// Run the full recognition + extraction pipeline for one invoice under
    /// the wall-clock budget. A job that overruns lands in Failed with a
    /// timeout-specific message.
    #[instrument(skip(self), fields(invoice_id = %id))]
    pub async fn process(&self, id: Uuid) -> Result<InvoiceRecord> {
        let record = self.fetch(id).await?;
        let record = match record.status {
            InvoiceStatus::Processing => record,
            status if status.can_begin_processing() => self.begin_processing(id).await?,
            status => {
                return Err(AppError::InvalidStatus {
                    id,
                    status: status.as_str().to_string(),
                    operation: "process",
                })
            }
        };

        let started = Instant::now();
        let budget = Duration::from_secs(self.config.processing_timeout_secs);

        match tokio::time::timeout(budget, self.run_stages(&record)).await {
            Ok(Ok((document, outcome))) => {
                self.complete(record, document, outcome, started.elapsed())
                    .await
            }
            Ok(Err(err)) => {
                self.mark_failed(id, &err.to_string()).await?;
                metrics::record_processing(started.elapsed().as_secs_f64(), "failed");
                Err(err)
            }
            Err(_) => {
                let err = AppError::Timeout {
                    seconds: self.config.processing_timeout_secs,
                };
                self.mark_failed(id, &err.to_string()).await?;
                metrics::record_processing(started.elapsed().as_secs_f64(), "timeout");
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        record: &InvoiceRecord,
    ) -> Result<(RecognizedDocument, ExtractionOutcome)> {
        let content = self.files.fetch(&record.file_ref).await?;
        let document = self
            .recognizer
            .recognize(&content, &record.mime_type)
            .await?;
        let outcome = self.extractor.extract_with_fallback(&document.text).await;
        Ok((document, outcome))
    }

    async fn complete(
        &self,
        mut record: InvoiceRecord,
        document: RecognizedDocument,
        outcome: ExtractionOutcome,
        elapsed: Duration,
    ) -> Result<InvoiceRecord> {
        record.recognized_text = Some(document.text);
        record.confidence_score = Some(document.confidence);

        match outcome {
            ExtractionOutcome::Reconciled(data) => {
                record.extracted_data = Some(data);
                record.requires_review = false;
                record.error_message = None;
            }
            ExtractionOutcome::RequiresReview { data, error } => {
                record.extracted_data = Some(data);
                record.requires_review = true;
                // Keep the cause visible for the reviewer
                record.error_message = Some(error);
            }
        }

        record.status = InvoiceStatus::Completed;
        record.processing_time_seconds = Some(elapsed.as_secs_f64());
        record.touch();
        self.store.update(&record).await?;

        let outcome_label = if record.requires_review {
            "requires_review"
        } else {
            "completed"
        };
        metrics::record_processing(elapsed.as_secs_f64(), outcome_label);
        info!(
            invoice_id = %record.id,
            requires_review = record.requires_review,
            "Invoice processing completed"
        );
        Ok(record)
    }

    /// Mark an invoice failed, dropping any partial financial data
    pub async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<InvoiceRecord> {
        let mut record = self.fetch(id).await?;
        record.status = InvoiceStatus::Failed;
        record.error_message = Some(reason.to_string());
        record.extracted_data = None;
        record.requires_review = false;
        record.touch();
        self.store.update(&record).await?;

        error!(invoice_id = %id, reason, "Invoice processing failed");
        Ok(record)
    }

    /// The reconciled financial record, if the invoice has one
    pub async fn get_reconciled_result(&self, id: Uuid) -> Result<Option<ExtractedInvoiceData>> {
        Ok(self.fetch(id).await?.extracted_data)
    }

    /// Export a completed invoice to the external ledger. Re-invoking on an
    /// already-exported invoice is rejected before the ledger is contacted.
    #[instrument(skip(self), fields(invoice_id = %id))]
    pub async fn export_invoice(&self, id: Uuid) -> Result<LedgerExportReceipt> {
        let mut record = self.fetch(id).await?;

        if record.status == InvoiceStatus::Exported {
            return Err(AppError::InvalidStatus {
                id,
                status: record.status.as_str().to_string(),
                operation: "export again",
            });
        }
        if !record.status.can_export() {
            return Err(AppError::InvalidStatus {
                id,
                status: record.status.as_str().to_string(),
                operation: "export",
            });
        }
        if record.extracted_data.is_none() {
            return Err(AppError::MissingExtractedData { id });
        }

        let started = Instant::now();
        let receipt = match self.ledger.export(&record).await {
            Ok(receipt) => receipt,
            Err(err) => {
                metrics::record_export(started.elapsed().as_secs_f64(), false);
                return Err(err);
            }
        };
        metrics::record_export(started.elapsed().as_secs_f64(), true);

        record.status = InvoiceStatus::Exported;
        record.ledger_invoice_id = Some(receipt.external_id.clone());
        record.exported = true;
        record.exported_at = Some(Utc::now());
        record.touch();
        self.store.update(&record).await?;

        info!(invoice_id = %id, ledger_id = %receipt.external_id, "Invoice exported");
        Ok(receipt)
    }

    /// Apply a manual correction. When the edit touches the subtotal/rate
    /// pair the tax arithmetic is re-validated and the engine's numbers
    /// replace inconsistent tax/total amounts, mirroring extraction
    /// reconciliation. A corrected failed invoice becomes completed.
    pub async fn apply_correction(
        &self,
        id: Uuid,
        correction: InvoiceCorrection,
    ) -> Result<InvoiceRecord> {
        let mut record = self.fetch(id).await?;
        if !record.status.can_edit() {
            return Err(AppError::InvalidStatus {
                id,
                status: record.status.as_str().to_string(),
                operation: "edit",
            });
        }

        let mut data = record
            .extracted_data
            .take()
            .unwrap_or_else(ExtractedInvoiceData::empty);

        if let Some(value) = correction.invoice_number {
            data.invoice_number = Some(value);
        }
        if let Some(value) = correction.invoice_date {
            data.invoice_date = Some(value);
        }
        if let Some(value) = correction.supplier_name {
            data.supplier_name = Some(value);
        }
        if let Some(value) = correction.supplier_tax_number {
            data.supplier_tax_number = Some(value);
        }
        if let Some(value) = correction.customer_name {
            data.customer_name = Some(value);
        }
        if let Some(value) = correction.currency {
            data.currency = value;
        }
        if let Some(value) = correction.subtotal {
            data.subtotal = value;
        }
        if let Some(value) = correction.total_tax {
            data.total_tax = value;
        }
        if let Some(value) = correction.total_amount {
            data.total_amount = value;
        }

        if let (Some(subtotal), Some(rate)) = (correction.subtotal, correction.tax_rate) {
            let result = tax::validate(subtotal, data.total_tax, data.total_amount, Some(rate));
            if !result.is_valid {
                if let Some(suggested) = result.suggested {
                    warn!(
                        invoice_id = %id,
                        detail = result.message.as_deref().unwrap_or(""),
                        "Corrected amounts do not reconcile, substituting computed values"
                    );
                    data.total_tax = suggested.tax_amount;
                    data.total_amount = suggested.total;
                }
            }
        }

        record.extracted_data = Some(data);
        record.is_manually_corrected = true;
        record.requires_review = false;
        if record.status == InvoiceStatus::Failed {
            record.status = InvoiceStatus::Completed;
            record.error_message = None;
        }
        record.touch();
        self.store.update(&record).await?;

        info!(invoice_id = %id, "Manual correction applied");
        Ok(record)
    }

    /// Remove a user-owned invoice entirely. File cleanup belongs to the
    /// storage collaborator.
    pub async fn delete_invoice(&self, id: Uuid) -> Result<bool> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            info!(invoice_id = %id, "Invoice deleted");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use faturaforge_common::completion::{CompletionClient, MockCompletion};
    use faturaforge_common::config::ExtractionConfig;
    use faturaforge_common::ledger::MockLedger;
    use faturaforge_common::recognition::MockRecognizer;
    use faturaforge_common::store::{InMemoryFileStorage, InMemoryInvoiceStore};
    use faturaforge_common::tax::decimal;

    struct Harness {
        store: Arc<InMemoryInvoiceStore>,
        ledger: Arc<MockLedger>,
        processor: InvoiceProcessor,
    }

    fn valid_response() -> String {
        r#"{
            "invoice_number": "FTR2024001234",
            "invoice_date": "2024-01-15",
            "supplier_name": "ABC Ticaret Ltd.",
            "currency": "TRY",
            "subtotal": "100.00",
            "total_tax": "20.00",
            "total_amount": "120.00",
            "line_items": [
                {
                    "description": "Consulting",
                    "quantity": "2",
                    "unit_price": "50.00",
                    "tax_rate": "20",
                    "line_total": "100.00"
                }
            ]
        }"#
        .to_string()
    }

    async fn harness_with(
        recognizer: MockRecognizer,
        responses: Vec<std::result::Result<String, String>>,
        timeout_secs: u64,
    ) -> (Harness, Uuid) {
        let store = Arc::new(InMemoryInvoiceStore::new());
        let files = Arc::new(InMemoryFileStorage::new());
        let ledger = Arc::new(MockLedger::new());

        let record = InvoiceRecord::new_upload(
            Uuid::new_v4(),
            "fatura.pdf",
            "files/fatura.pdf",
            1024,
            "application/pdf",
        );
        let id = record.id;
        files.put("files/fatura.pdf", b"%PDF-1.7".to_vec()).await;
        store.insert(record).await.unwrap();

        let extractor = StructuredExtractor::new(
            Arc::new(MockCompletion::new(responses)),
            ExtractionConfig {
                retry_pause_ms: 1,
                ..ExtractionConfig::default()
            },
        );

        let processor = InvoiceProcessor::new(
            store.clone(),
            files,
            Arc::new(recognizer),
            extractor,
            ledger.clone(),
            PipelineConfig {
                processing_timeout_secs: timeout_secs,
                ..PipelineConfig::default()
            },
        );

        (
            Harness {
                store,
                ledger,
                processor,
            },
            id,
        )
    }

    #[tokio::test]
    async fn test_happy_path_completes() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("Fatura No: FTR2024001234", 0.93),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        let record = harness.processor.process(id).await.unwrap();
        assert_eq!(record.status, InvoiceStatus::Completed);
        assert!(!record.requires_review);
        assert_eq!(record.confidence_score, Some(0.93));
        assert!(record.processing_time_seconds.is_some());
        assert!(record.recognized_text.is_some());

        let data = record.extracted_data.unwrap();
        assert_eq!(data.subtotal, decimal("100.00"));
        assert_eq!(data.total_amount, decimal("120.00"));
    }

    #[tokio::test]
    async fn test_exhausted_extraction_falls_back_to_review() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("unreadable scan", 0.31),
            vec![
                Ok("{broken".to_string()),
                Ok("{broken".to_string()),
                Ok("{broken".to_string()),
            ],
            300,
        )
        .await;

        let record = harness.processor.process(id).await.unwrap();
        assert_eq!(record.status, InvoiceStatus::Completed);
        assert!(record.requires_review);
        assert_eq!(record.extracted_data.unwrap(), ExtractedInvoiceData::empty());
        assert!(record.error_message.unwrap().contains("3 attempts"));
    }

    #[tokio::test]
    async fn test_recognition_failure_marks_failed() {
        let (harness, id) = harness_with(
            MockRecognizer::failing("service unavailable"),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        let err = harness.processor.process(id).await.unwrap_err();
        assert!(matches!(err, AppError::Recognition { .. }));

        let record = harness.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, InvoiceStatus::Failed);
        assert!(record.extracted_data.is_none());
        assert!(record
            .error_message
            .unwrap()
            .contains("service unavailable"));
    }

    #[tokio::test]
    async fn test_processing_guard_rejects_completed() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("text", 0.9),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        harness.processor.process(id).await.unwrap();
        let err = harness.processor.process(id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidStatus { .. }));
    }

    #[tokio::test]
    async fn test_failed_invoice_can_be_resubmitted() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("text", 0.9),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        harness.processor.mark_failed(id, "first pass broke").await.unwrap();
        let record = harness.processor.process(id).await.unwrap();
        assert_eq!(record.status, InvoiceStatus::Completed);
        assert!(record.error_message.is_none());
    }

    struct HangingCompletion;

    #[async_trait]
    impl CompletionClient for HangingCompletion {
        async fn complete(&self, _s: &str, _u: &str, _t: f32) -> faturaforge_common::Result<String> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_timeout_moves_invoice_to_failed() {
        let store = Arc::new(InMemoryInvoiceStore::new());
        let files = Arc::new(InMemoryFileStorage::new());
        let record = InvoiceRecord::new_upload(
            Uuid::new_v4(),
            "fatura.pdf",
            "files/fatura.pdf",
            1024,
            "application/pdf",
        );
        let id = record.id;
        files.put("files/fatura.pdf", b"%PDF-1.7".to_vec()).await;
        store.insert(record).await.unwrap();

        let processor = InvoiceProcessor::new(
            store.clone(),
            files,
            Arc::new(MockRecognizer::succeeding("text", 0.9)),
            StructuredExtractor::new(Arc::new(HangingCompletion), ExtractionConfig::default()),
            Arc::new(MockLedger::new()),
            PipelineConfig {
                processing_timeout_secs: 0,
                ..PipelineConfig::default()
            },
        );

        let err = processor.process(id).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout { .. }));

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, InvoiceStatus::Failed);
        assert!(record.error_message.unwrap().contains("budget"));
    }

    #[tokio::test]
    async fn test_export_happy_path() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("text", 0.9),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        harness.processor.process(id).await.unwrap();
        let receipt = harness.processor.export_invoice(id).await.unwrap();
        assert_eq!(receipt.external_id, "mock-1");
        assert_eq!(harness.ledger.calls(), 1);

        let record = harness.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, InvoiceStatus::Exported);
        assert!(record.exported);
        assert_eq!(record.ledger_invoice_id.as_deref(), Some("mock-1"));
        assert!(record.exported_at.is_some());
    }

    #[tokio::test]
    async fn test_second_export_rejected_without_ledger_call() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("text", 0.9),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        harness.processor.process(id).await.unwrap();
        harness.processor.export_invoice(id).await.unwrap();

        let err = harness.processor.export_invoice(id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidStatus { .. }));
        // The guard fires before the client, so the call count stays put
        assert_eq!(harness.ledger.calls(), 1);
    }

    #[tokio::test]
    async fn test_export_requires_completed_status() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("text", 0.9),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        let err = harness.processor.export_invoice(id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidStatus { .. }));
        assert_eq!(harness.ledger.calls(), 0);
    }

    #[tokio::test]
    async fn test_correction_substitutes_engine_values() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("text", 0.9),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        harness.processor.process(id).await.unwrap();

        // User corrects the subtotal but leaves inconsistent tax/total
        let correction = InvoiceCorrection {
            subtotal: Some(decimal("200.00")),
            tax_rate: Some(decimal("20")),
            ..InvoiceCorrection::default()
        };
        let record = harness
            .processor
            .apply_correction(id, correction)
            .await
            .unwrap();

        assert!(record.is_manually_corrected);
        let data = record.extracted_data.unwrap();
        assert_eq!(data.subtotal, decimal("200.00"));
        assert_eq!(data.total_tax, decimal("40.00"));
        assert_eq!(data.total_amount, decimal("240.00"));
    }

    #[tokio::test]
    async fn test_correction_recovers_failed_invoice() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("text", 0.9),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        harness.processor.mark_failed(id, "broken scan").await.unwrap();

        let correction = InvoiceCorrection {
            invoice_number: Some("FTR-77".to_string()),
            subtotal: Some(decimal("100.00")),
            tax_rate: Some(decimal("20")),
            ..InvoiceCorrection::default()
        };
        let record = harness
            .processor
            .apply_correction(id, correction)
            .await
            .unwrap();

        assert_eq!(record.status, InvoiceStatus::Completed);
        assert!(record.error_message.is_none());
        let data = record.extracted_data.unwrap();
        assert_eq!(data.invoice_number.as_deref(), Some("FTR-77"));
        assert_eq!(data.total_tax, decimal("20.00"));
        assert_eq!(data.total_amount, decimal("120.00"));
    }

    #[tokio::test]
    async fn test_correction_rejected_after_export() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("text", 0.9),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        harness.processor.process(id).await.unwrap();
        harness.processor.export_invoice(id).await.unwrap();

        let err = harness
            .processor
            .apply_correction(id, InvoiceCorrection::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStatus { .. }));
    }

    #[tokio::test]
    async fn test_reconciled_result_lookup() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("text", 0.9),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        assert!(harness
            .processor
            .get_reconciled_result(id)
            .await
            .unwrap()
            .is_none());

        harness.processor.process(id).await.unwrap();
        let data = harness
            .processor
            .get_reconciled_result(id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data.total_amount, decimal("120.00"));
    }

    #[tokio::test]
    async fn test_delete_invoice() {
        let (harness, id) = harness_with(
            MockRecognizer::succeeding("text", 0.9),
            vec![Ok(valid_response())],
            300,
        )
        .await;

        assert!(harness.processor.delete_invoice(id).await.unwrap());
        assert!(!harness.processor.delete_invoice(id).await.unwrap());
        assert!(matches!(
            harness.processor.process(id).await.unwrap_err(),
            AppError::NotFound { .. }
        ));
    }
}
