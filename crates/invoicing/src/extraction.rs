//! Structured invoice data pulled out of an uploaded document, and parsing of the
//! language model's answer into it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use kontor_core::parse_amount_cents;

/// Instruction sent along with the PDF.
pub const EXTRACTION_PROMPT: &str = "Extract the invoice metadata from the attached PDF. \
Answer with a single JSON object and nothing else, using these keys: invoice_number, \
invoice_date (YYYY-MM-DD), due_date (YYYY-MM-DD), vendor_name, vendor_vat_id, vendor_iban, \
currency (ISO 4217), net_amount, tax_amount, gross_amount (decimal numbers). Use null for \
anything that is not on the document.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("response contains no JSON object")]
    NoJson,

    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("no invoice data could be extracted")]
    Empty,

    #[error("document is not a CII invoice")]
    NotCii,

    #[error("extraction service failed: {0}")]
    Service(String),
}

/// Where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionSource {
    Zugferd,
    Llm,
}

/// Invoice metadata; every field optional because documents are incomplete.
/// Amounts are in cents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceData {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub vendor_name: Option<String>,
    pub vendor_vat_id: Option<String>,
    pub vendor_iban: Option<String>,
    pub currency: Option<String>,
    pub net_amount: Option<i64>,
    pub tax_amount: Option<i64>,
    pub gross_amount: Option<i64>,
}

impl InvoiceData {
    pub fn is_empty(&self) -> bool {
        *self == InvoiceData::default()
    }

    /// `self` with every field that `overrides` sets replaced.
    pub fn merged(&self, overrides: &InvoiceData) -> InvoiceData {
        fn pick<T: Clone>(over: &Option<T>, base: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }
        InvoiceData {
            invoice_number: pick(&overrides.invoice_number, &self.invoice_number),
            invoice_date: pick(&overrides.invoice_date, &self.invoice_date),
            due_date: pick(&overrides.due_date, &self.due_date),
            vendor_name: pick(&overrides.vendor_name, &self.vendor_name),
            vendor_vat_id: pick(&overrides.vendor_vat_id, &self.vendor_vat_id),
            vendor_iban: pick(&overrides.vendor_iban, &self.vendor_iban),
            currency: pick(&overrides.currency, &self.currency),
            net_amount: pick(&overrides.net_amount, &self.net_amount),
            tax_amount: pick(&overrides.tax_amount, &self.tax_amount),
            gross_amount: pick(&overrides.gross_amount, &self.gross_amount),
        }
    }
}

/// Accepts `2024-03-01`, `2024-03-01T...`, `01.03.2024` and `20240301`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    let iso = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(iso, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d.%m.%Y"))
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
}

fn json_block(text: &str) -> Option<&str> {
    // Prefer a fenced block; models like to wrap answers in ```json.
    if let Some(start) = text.find("```") {
        let body = &text[start + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn text_field(obj: &JsonValue, key: &str) -> Option<String> {
    match obj.get(key)? {
        JsonValue::String(s) => {
            let s = s.trim();
            (!s.is_empty() && !s.eq_ignore_ascii_case("null")).then(|| s.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn amount_field(obj: &JsonValue, key: &str) -> Option<i64> {
    match obj.get(key)? {
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                return i.checked_mul(100);
            }
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| (f * 100.0).round() as i64)
        }
        JsonValue::String(s) => parse_amount_cents(s),
        _ => None,
    }
}

fn date_field(obj: &JsonValue, key: &str) -> Option<NaiveDate> {
    text_field(obj, key).as_deref().and_then(parse_date)
}

/// Parse the model's free-text answer.
pub fn parse_llm_response(text: &str) -> Result<InvoiceData, ExtractionError> {
    let block = json_block(text).ok_or(ExtractionError::NoJson)?;
    let obj: JsonValue =
        serde_json::from_str(block).map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;
    if !obj.is_object() {
        return Err(ExtractionError::NoJson);
    }

    let data = InvoiceData {
        invoice_number: text_field(&obj, "invoice_number"),
        invoice_date: date_field(&obj, "invoice_date"),
        due_date: date_field(&obj, "due_date"),
        vendor_name: text_field(&obj, "vendor_name"),
        vendor_vat_id: text_field(&obj, "vendor_vat_id"),
        vendor_iban: text_field(&obj, "vendor_iban"),
        currency: text_field(&obj, "currency").map(|c| c.to_ascii_uppercase()),
        net_amount: amount_field(&obj, "net_amount"),
        tax_amount: amount_field(&obj, "tax_amount"),
        gross_amount: amount_field(&obj, "gross_amount"),
    };
    if data.is_empty() {
        return Err(ExtractionError::Empty);
    }
    Ok(data)
}
