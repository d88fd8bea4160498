//! Ledger wire format
//!
//! The ledger accepts a nested sales-invoice payload: invoice attributes
//! plus detail (line item) and contact sub-objects. Amounts travel as
//! floats on this wire; the exact decimals stay authoritative on our side.

use crate::errors::{AppError, Result};
use crate::models::InvoiceRecord;
use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SalesInvoiceEnvelope {
    pub data: SalesInvoiceData,
}

#[derive(Debug, Serialize)]
pub struct SalesInvoiceData {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attributes: SalesInvoiceAttributes,
    pub relationships: SalesInvoiceRelationships,
}

#[derive(Debug, Serialize)]
pub struct SalesInvoiceAttributes {
    pub item_type: &'static str,
    pub description: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub invoice_id: Option<String>,
    pub currency: String,
    pub exchange_rate: f64,
    pub withholding_rate: f64,
    pub vat_withholding_rate: f64,
    pub invoice_discount_type: &'static str,
    pub invoice_discount: f64,
    pub billing_address: Option<String>,
    pub tax_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SalesInvoiceRelationships {
    pub details: DetailCollection,
    pub contact: ContactWrapper,
}

#[derive(Debug, Serialize)]
pub struct DetailCollection {
    pub data: Vec<DetailObject>,
}

#[derive(Debug, Serialize)]
pub struct DetailObject {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attributes: DetailAttributes,
}

#[derive(Debug, Serialize)]
pub struct DetailAttributes {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub vat_rate: f64,
    pub discount_type: &'static str,
    pub discount_value: f64,
}

#[derive(Debug, Serialize)]
pub struct ContactWrapper {
    pub data: ContactObject,
}

#[derive(Debug, Serialize)]
pub struct ContactObject {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attributes: ContactAttributes,
}

#[derive(Debug, Serialize)]
pub struct ContactAttributes {
    pub name: String,
    pub tax_number: Option<String>,
    pub address: Option<String>,
}

/// Response envelope for a created sales invoice
#[derive(Debug, Deserialize)]
pub struct LedgerCreateResponse {
    pub data: LedgerCreatedObject,
}

#[derive(Debug, Deserialize)]
pub struct LedgerCreatedObject {
    pub id: String,
}

/// Convert a reconciled invoice into the ledger payload.
///
/// A missing issue date falls back to `today`; a missing due date to
/// issue date + `due_days`. Discount and withholding fields are zeroed,
/// the invoice never carries them at this point.
pub fn build_payload(
    record: &InvoiceRecord,
    today: NaiveDate,
    due_days: i64,
) -> Result<SalesInvoiceEnvelope> {
    let data = record
        .extracted_data
        .as_ref()
        .ok_or(AppError::MissingExtractedData { id: record.id })?;

    let issue_date = data.invoice_date.unwrap_or(today);
    let due_date = data
        .due_date
        .unwrap_or_else(|| issue_date + Duration::days(due_days));

    let details = data
        .line_items
        .iter()
        .enumerate()
        .map(|(index, item)| DetailObject {
            kind: "sales_invoice_details",
            attributes: DetailAttributes {
                description: if item.description.is_empty() {
                    format!("Item {}", index + 1)
                } else {
                    item.description.clone()
                },
                quantity: item.quantity.to_f64().unwrap_or(0.0),
                unit_price: item.unit_price.to_f64().unwrap_or(0.0),
                vat_rate: item.tax_rate.to_f64().unwrap_or(0.0),
                discount_type: "percentage",
                discount_value: 0.0,
            },
        })
        .collect();

    Ok(SalesInvoiceEnvelope {
        data: SalesInvoiceData {
            kind: "sales_invoices",
            attributes: SalesInvoiceAttributes {
                item_type: "invoice",
                description: data
                    .invoice_number
                    .clone()
                    .unwrap_or_else(|| format!("Invoice {}", record.id)),
                issue_date,
                due_date,
                invoice_id: data.invoice_number.clone(),
                currency: data.currency.clone(),
                exchange_rate: 1.0,
                withholding_rate: 0.0,
                vat_withholding_rate: 0.0,
                invoice_discount_type: "percentage",
                invoice_discount: 0.0,
                billing_address: data.supplier_address.clone(),
                tax_number: data.supplier_tax_number.clone(),
            },
            relationships: SalesInvoiceRelationships {
                details: DetailCollection { data: details },
                contact: ContactWrapper {
                    data: ContactObject {
                        kind: "contacts",
                        attributes: ContactAttributes {
                            name: data
                                .supplier_name
                                .clone()
                                .unwrap_or_else(|| "Unknown Supplier".to_string()),
                            tax_number: data.supplier_tax_number.clone(),
                            address: data.supplier_address.clone(),
                        },
                    },
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractedInvoiceData, LineItem};
    use crate::tax::decimal;
    use uuid::Uuid;

    fn record_with_data(data: ExtractedInvoiceData) -> InvoiceRecord {
        let mut record = InvoiceRecord::new_upload(
            Uuid::new_v4(),
            "fatura.pdf",
            "files/fatura.pdf",
            1024,
            "application/pdf",
        );
        record.extracted_data = Some(data);
        record
    }

    fn sample_data() -> ExtractedInvoiceData {
        let mut data = ExtractedInvoiceData::empty();
        data.invoice_number = Some("FTR2024001234".to_string());
        data.supplier_name = Some("ABC Ticaret Ltd.".to_string());
        data.supplier_tax_number = Some("1234567890".to_string());
        data.line_items.push(LineItem {
            description: "Software license".to_string(),
            quantity: decimal("2"),
            unit_price: decimal("500.00"),
            tax_rate: decimal("20"),
            line_total: decimal("1000.00"),
        });
        data
    }

    #[test]
    fn test_missing_dates_default() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let record = record_with_data(sample_data());

        let payload = build_payload(&record, today, 30).unwrap();
        assert_eq!(payload.data.attributes.issue_date, today);
        assert_eq!(
            payload.data.attributes.due_date,
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
        );
    }

    #[test]
    fn test_stated_dates_win() {
        let mut data = sample_data();
        data.invoice_date = NaiveDate::from_ymd_opt(2024, 1, 15);
        data.due_date = NaiveDate::from_ymd_opt(2024, 2, 1);
        let record = record_with_data(data);

        let payload = build_payload(
            &record,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            30,
        )
        .unwrap();
        assert_eq!(
            payload.data.attributes.issue_date,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert_eq!(
            payload.data.attributes.due_date,
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
        );
    }

    #[test]
    fn test_line_items_and_zeroed_fields() {
        let record = record_with_data(sample_data());
        let payload =
            build_payload(&record, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 30).unwrap();

        assert_eq!(payload.data.kind, "sales_invoices");
        assert_eq!(payload.data.attributes.invoice_discount, 0.0);
        assert_eq!(payload.data.attributes.withholding_rate, 0.0);
        assert_eq!(payload.data.attributes.exchange_rate, 1.0);

        let details = &payload.data.relationships.details.data;
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].attributes.quantity, 2.0);
        assert_eq!(details[0].attributes.unit_price, 500.0);
        assert_eq!(details[0].attributes.vat_rate, 20.0);

        let contact = &payload.data.relationships.contact.data.attributes;
        assert_eq!(contact.name, "ABC Ticaret Ltd.");
        assert_eq!(contact.tax_number.as_deref(), Some("1234567890"));
    }

    #[test]
    fn test_missing_extracted_data_is_permanent_failure() {
        let record = InvoiceRecord::new_upload(
            Uuid::new_v4(),
            "fatura.pdf",
            "files/fatura.pdf",
            1024,
            "application/pdf",
        );
        let err = build_payload(&record, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 30)
            .unwrap_err();
        assert!(matches!(err, AppError::MissingExtractedData { .. }));
    }

    #[test]
    fn test_serialized_shape() {
        let record = record_with_data(sample_data());
        let payload =
            build_payload(&record, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 30).unwrap();

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["data"]["type"], "sales_invoices");
        assert_eq!(value["data"]["attributes"]["issue_date"], "2024-03-01");
        assert_eq!(
            value["data"]["relationships"]["details"]["data"][0]["type"],
            "sales_invoice_details"
        );
        assert_eq!(
            value["data"]["relationships"]["contact"]["data"]["type"],
            "contacts"
        );
    }
}
