//! Structured financial record extracted from a recognized invoice
//!
//! These types double as the language model's target schema: every field is
//! deserialized leniently (missing keys default, dates parse from the
//! formats seen on real documents) so a structurally sound completion is
//! not rejected for cosmetic reasons.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::DEFAULT_CURRENCY;

/// One invoice line. `line_total` is the net amount (quantity * unit_price).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// KDV percentage applied to this line
    pub tax_rate: Decimal,
    pub line_total: Decimal,
}

/// Structured invoice data, reconciled by the extractor before it is
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInvoiceData {
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub invoice_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub due_date: Option<NaiveDate>,

    #[serde(default)]
    pub supplier_name: Option<String>,
    #[serde(default)]
    pub supplier_tax_number: Option<String>,
    #[serde(default)]
    pub supplier_address: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_tax_number: Option<String>,
    #[serde(default)]
    pub customer_address: Option<String>,

    #[serde(default = "default_currency")]
    pub currency: String,
    /// Net total of all line items
    #[serde(default)]
    pub subtotal: Decimal,
    /// Total KDV amount
    #[serde(default)]
    pub total_tax: Decimal,
    /// Gross total including KDV
    #[serde(default)]
    pub total_amount: Decimal,
    #[serde(default)]
    pub line_items: Vec<LineItem>,

    #[serde(default)]
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl ExtractedInvoiceData {
    /// The all-null, zeroed record used by the degraded extraction path.
    pub fn empty() -> Self {
        Self {
            invoice_number: None,
            invoice_date: None,
            due_date: None,
            supplier_name: None,
            supplier_tax_number: None,
            supplier_address: None,
            customer_name: None,
            customer_tax_number: None,
            customer_address: None,
            currency: default_currency(),
            subtotal: Decimal::ZERO,
            total_tax: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            line_items: Vec::new(),
            payment_terms: None,
            notes: None,
        }
    }

    /// Field-constraint violations, if any. An empty list means the record
    /// is structurally sound (it may still need reconciliation).
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.subtotal < Decimal::ZERO {
            problems.push("subtotal cannot be negative".to_string());
        }
        if self.total_tax < Decimal::ZERO {
            problems.push("total tax cannot be negative".to_string());
        }
        if self.total_amount < Decimal::ZERO {
            problems.push("total amount cannot be negative".to_string());
        }

        for (index, item) in self.line_items.iter().enumerate() {
            if item.quantity < Decimal::ZERO {
                problems.push(format!("line {}: quantity cannot be negative", index + 1));
            }
            if item.unit_price < Decimal::ZERO {
                problems.push(format!("line {}: unit price cannot be negative", index + 1));
            }
            if item.line_total < Decimal::ZERO {
                problems.push(format!("line {}: line total cannot be negative", index + 1));
            }
            if item.tax_rate < Decimal::ZERO || item.tax_rate > Decimal::from(100u32) {
                problems.push(format!(
                    "line {}: tax rate must be between 0 and 100",
                    index + 1
                ));
            }
        }

        problems
    }
}

impl Default for ExtractedInvoiceData {
    fn default() -> Self {
        Self::empty()
    }
}

/// Manual correction applied to a completed or failed invoice
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceCorrection {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub supplier_name: Option<String>,
    pub supplier_tax_number: Option<String>,
    pub customer_name: Option<String>,
    pub currency: Option<String>,
    pub subtotal: Option<Decimal>,
    /// KDV percentage the corrected subtotal should be taxed at
    pub tax_rate: Option<Decimal>,
    pub total_tax: Option<Decimal>,
    pub total_amount: Option<Decimal>,
}

/// Dates appear as ISO, dotted, or slashed depending on the document.
pub fn parse_flexible_date(value: &str) -> Option<NaiveDate> {
    const FORMATS: [&str; 4] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d"];

    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_flexible_date))
}
