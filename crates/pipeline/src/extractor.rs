//! AI-assisted structured extraction
//!
//! Turns recognized invoice text into a validated, numerically reconciled
//! financial record:
//! 1. Ask the language model for one JSON object matching the target schema
//! 2. Retry with escalating temperature on parse or constraint failure
//! 3. Reconcile line items and document totals against the tax engine
//!
//! Arithmetic always wins over model-stated amounts.

use faturaforge_common::completion::CompletionClient;
use faturaforge_common::config::ExtractionConfig;
use faturaforge_common::errors::{AppError, Result};
use faturaforge_common::metrics;
use faturaforge_common::models::ExtractedInvoiceData;
use faturaforge_common::tax;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Stated line totals further than this from quantity * unit_price are
/// replaced, in currency units.
fn line_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// Document totals accumulate rounding across many lines, so their
/// replacement threshold is coarser than the per-line one.
fn document_tolerance() -> Decimal {
    Decimal::ONE
}

/// Temperature added per retry to escape a degenerate completion
const TEMPERATURE_STEP: f32 = 0.2;

/// Outcome of a best-effort extraction
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// The model produced a record and it reconciled cleanly
    Reconciled(ExtractedInvoiceData),
    /// Extraction failed; the caller gets an empty record that a human has
    /// to review before the invoice is trustworthy
    RequiresReview {
        data: ExtractedInvoiceData,
        error: String,
    },
}

/// Structured extractor over a completion provider
pub struct StructuredExtractor {
    completion: Arc<dyn CompletionClient>,
    config: ExtractionConfig,
}

impl StructuredExtractor {
    pub fn new(completion: Arc<dyn CompletionClient>, config: ExtractionConfig) -> Self {
        Self { completion, config }
    }

    /// Extract a reconciled record, failing only after the whole attempt
    /// budget is spent. Empty input fails immediately without a model call.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn extract(&self, text: &str) -> Result<ExtractedInvoiceData> {
        if text.trim().is_empty() {
            return Err(AppError::EmptyInput);
        }

        let system_prompt = build_system_prompt();
        let user_prompt = build_user_prompt(text);
        let attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let temperature =
                (self.config.initial_temperature + attempt as f32 * TEMPERATURE_STEP).min(1.0);
            debug!(
                attempt = attempt + 1,
                attempts, temperature, "Requesting structured extraction"
            );

            match self.attempt(&system_prompt, &user_prompt, temperature).await {
                Ok(data) => {
                    metrics::record_extraction_attempt(true);
                    let data = reconcile(data);
                    info!(
                        invoice_number = ?data.invoice_number,
                        total = %data.total_amount,
                        "Extraction succeeded"
                    );
                    return Ok(data);
                }
                Err(err) => {
                    metrics::record_extraction_attempt(false);
                    warn!(attempt = attempt + 1, error = %err, "Extraction attempt failed");
                    last_error = err.to_string();
                    if attempt + 1 < attempts {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_pause_ms))
                            .await;
                    }
                }
            }
        }

        Err(AppError::ExtractionFailed {
            attempts,
            message: last_error,
        })
    }

    /// Best-effort variant: never fails. A lost extraction yields an empty
    /// record flagged for review, so the invoice still completes instead of
    /// blocking the user's pipeline.
    pub async fn extract_with_fallback(&self, text: &str) -> ExtractionOutcome {
        match self.extract(text).await {
            Ok(data) => ExtractionOutcome::Reconciled(data),
            Err(err) => {
                warn!(error = %err, "Extraction failed, returning empty record for manual review");
                ExtractionOutcome::RequiresReview {
                    data: ExtractedInvoiceData::empty(),
                    error: err.to_string(),
                }
            }
        }
    }

    async fn attempt(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<ExtractedInvoiceData> {
        let raw = self
            .completion
            .complete(system_prompt, user_prompt, temperature)
            .await?;

        let data: ExtractedInvoiceData =
            serde_json::from_str(&raw).map_err(|e| AppError::Completion {
                message: format!("response is not a valid record: {}", e),
            })?;

        let problems = data.validate();
        if !problems.is_empty() {
            return Err(AppError::Completion {
                message: format!("record violates field constraints: {}", problems.join("; ")),
            });
        }

        Ok(data)
    }
}

/// Overwrite model-stated amounts with engine-computed ones wherever they
/// disagree beyond tolerance. Document totals are rebuilt from the computed
/// line amounts; without line items the stated totals are kept as-is.
pub fn reconcile(mut data: ExtractedInvoiceData) -> ExtractedInvoiceData {
    if data.line_items.is_empty() {
        debug!("No line items extracted, keeping stated totals");
        return data;
    }

    let mut subtotal = Decimal::ZERO;
    let mut total_tax = Decimal::ZERO;

    for (index, item) in data.line_items.iter_mut().enumerate() {
        let computed = tax::round_half_up(item.quantity * item.unit_price);
        if (item.line_total - computed).abs() > line_tolerance() {
            warn!(
                line = index + 1,
                stated = %item.line_total,
                computed = %computed,
                "Line total disagrees with quantity * unit price, using computed value"
            );
            item.line_total = computed;
        }
        subtotal += computed;
        total_tax += tax::forward(computed, item.tax_rate).tax_amount;
    }

    let total_amount = subtotal + total_tax;

    if (data.subtotal - subtotal).abs() > document_tolerance() {
        warn!(stated = %data.subtotal, computed = %subtotal, "Subtotal replaced by line sum");
        data.subtotal = subtotal;
    }
    if (data.total_tax - total_tax).abs() > document_tolerance() {
        warn!(stated = %data.total_tax, computed = %total_tax, "Total tax replaced by line sum");
        data.total_tax = total_tax;
    }
    if (data.total_amount - total_amount).abs() > document_tolerance() {
        warn!(
            stated = %data.total_amount,
            computed = %total_amount,
            "Total amount replaced by computed gross"
        );
        data.total_amount = total_amount;
    }

    data
}

fn build_system_prompt() -> String {
    let rates = tax::valid_rates()
        .iter()
        .map(|rate| format!("{}%", rate))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are an assistant that analyses Turkish invoice documents.

Task: produce a single JSON object describing the invoice from recognized text.

Turkish invoice conventions:
- Invoice numbers usually follow labels such as "Fatura No:", "Invoice No:" or "Seri No:"
- Dates appear as DD.MM.YYYY or DD/MM/YYYY
- Tax identification numbers are 10 digits
- KDV (VAT) rates on the national schedule: {rates}
- The currency is usually TRY, but EUR and USD appear as well
- Amounts may use a comma or a period as the decimal separator

Fields to produce:
- invoice_number (string|null)
- invoice_date (YYYY-MM-DD|null)
- due_date (YYYY-MM-DD|null)
- supplier_name, supplier_tax_number, supplier_address (string|null)
- customer_name, customer_tax_number, customer_address (string|null)
- currency (string, default "TRY")
- line_items: array of {{description, quantity, unit_price, tax_rate, line_total}}
  where line_total is the net amount, quantity * unit_price
- subtotal: net total of all line items
- total_tax: total KDV amount
- total_amount: gross total including KDV
- payment_terms (string|null)
- notes (string|null)

Output rules:
- Return valid JSON only, no surrounding text
- Use null for fields you cannot find
- Format every numeric value as a string, for example "1234.50"
- Format dates as YYYY-MM-DD
"#
    )
}

fn build_user_prompt(text: &str) -> String {
    format!(
        "The following text was recognized from a Turkish invoice. Extract the structured \
         invoice data as JSON:\n\n--- RECOGNIZED TEXT START ---\n{}\n--- RECOGNIZED TEXT END ---\n\n\
         Note: the text may contain recognition errors; derive the most plausible values from \
         context.",
        text
    )
}
