//! Imported (incoming) invoices and their extraction state machine.
//!
//! ```text
//! PENDING ─▶ EXTRACTING ─▶ EXTRACTED ─▶ CONFIRMED
//!                ▲    └──▶ EXTRACTION_FAILED
//!                └──────────────┘ (retry / re-extract)
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use kontor_core::{
    Aggregate, AggregateRoot, Auditable, Currency, DomainError, Money, TenantId, typed_aggregate_id,
};
use kontor_customers::{CustomerId, CustomerMatch};
use kontor_events::Event;

use crate::extraction::{ExtractionSource, InvoiceData};
use crate::upload::FileKind;

typed_aggregate_id!(ImportedInvoiceId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Pending,
    Extracting,
    Extracted,
    ExtractionFailed,
    Confirmed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "PENDING",
            ImportStatus::Extracting => "EXTRACTING",
            ImportStatus::Extracted => "EXTRACTED",
            ImportStatus::ExtractionFailed => "EXTRACTION_FAILED",
            ImportStatus::Confirmed => "CONFIRMED",
        }
    }

    pub fn can_start_extraction(&self) -> bool {
        matches!(
            self,
            ImportStatus::Pending | ImportStatus::Extracted | ImportStatus::ExtractionFailed
        )
    }
}

/// The stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub filename: String,
    pub kind: FileKind,
    /// Hex SHA-256 of the content.
    pub content_hash: String,
    pub storage_key: String,
    pub size_bytes: u64,
}

/// Data an imported invoice was confirmed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedInvoice {
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub vendor_name: Option<String>,
    pub customer_id: Option<CustomerId>,
    pub net_amount: Option<Money>,
    pub tax_amount: Option<Money>,
    pub gross_amount: Money,
}

impl ConfirmedInvoice {
    /// Requires invoice number, date and gross amount.
    pub fn from_data(data: &InvoiceData, customer_id: Option<CustomerId>) -> Result<Self, DomainError> {
        let invoice_number = data
            .invoice_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DomainError::validation("invoice number is required"))?;
        let invoice_date = data
            .invoice_date
            .ok_or_else(|| DomainError::validation("invoice date is required"))?;
        let gross = data
            .gross_amount
            .ok_or_else(|| DomainError::validation("gross amount is required"))?;
        let currency: Currency = match data.currency.as_deref() {
            Some(code) => code.parse()?,
            None => Currency::EUR,
        };
        Ok(Self {
            invoice_number: invoice_number.to_string(),
            invoice_date,
            due_date: data.due_date,
            vendor_name: data.vendor_name.clone(),
            customer_id,
            net_amount: data.net_amount.map(|c| Money::new(c, currency)),
            tax_amount: data.tax_amount.map(|c| Money::new(c, currency)),
            gross_amount: Money::new(gross, currency),
        })
    }
}

/// Aggregate root: ImportedInvoice.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedInvoice {
    id: ImportedInvoiceId,
    tenant_id: Option<TenantId>,
    file: Option<StoredFile>,
    status: ImportStatus,
    attempts: u32,
    source: Option<ExtractionSource>,
    extracted: Option<InvoiceData>,
    failure_reason: Option<String>,
    suggested_customer: Option<CustomerMatch>,
    confirmed: Option<ConfirmedInvoice>,
    uploaded_at: Option<DateTime<Utc>>,
    version: u64,
}

impl ImportedInvoice {
    pub fn empty(id: ImportedInvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            file: None,
            status: ImportStatus::Pending,
            attempts: 0,
            source: None,
            extracted: None,
            failure_reason: None,
            suggested_customer: None,
            confirmed: None,
            uploaded_at: None,
            version: 0,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn file(&self) -> Option<&StoredFile> {
        self.file.as_ref()
    }

    pub fn status(&self) -> ImportStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn source(&self) -> Option<ExtractionSource> {
        self.source
    }

    pub fn extracted(&self) -> Option<&InvoiceData> {
        self.extracted.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn suggested_customer(&self) -> Option<&CustomerMatch> {
        self.suggested_customer.as_ref()
    }

    pub fn confirmed(&self) -> Option<&ConfirmedInvoice> {
        self.confirmed.as_ref()
    }

    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        self.uploaded_at
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if self.file.is_none() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::TenantMismatch);
        }
        Ok(())
    }

    fn transition_error(&self, to: ImportStatus) -> DomainError {
        DomainError::conflict(format!(
            "cannot move imported invoice from {} to {}",
            self.status.as_str(),
            to.as_str()
        ))
    }
}

impl AggregateRoot for ImportedInvoice {
    type Id = ImportedInvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportedInvoiceCommand {
    Upload {
        tenant_id: TenantId,
        imported_invoice_id: ImportedInvoiceId,
        file: StoredFile,
        occurred_at: DateTime<Utc>,
    },
    StartExtraction {
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
    CompleteExtraction {
        tenant_id: TenantId,
        source: ExtractionSource,
        data: InvoiceData,
        suggested_customer: Option<CustomerMatch>,
        occurred_at: DateTime<Utc>,
    },
    FailExtraction {
        tenant_id: TenantId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Confirm {
        tenant_id: TenantId,
        corrections: InvoiceData,
        customer_id: Option<CustomerId>,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportedInvoiceEvent {
    Uploaded {
        tenant_id: TenantId,
        imported_invoice_id: ImportedInvoiceId,
        file: StoredFile,
        occurred_at: DateTime<Utc>,
    },
    ExtractionStarted {
        attempt: u32,
        occurred_at: DateTime<Utc>,
    },
    Extracted {
        source: ExtractionSource,
        data: InvoiceData,
        suggested_customer: Option<CustomerMatch>,
        occurred_at: DateTime<Utc>,
    },
    ExtractionFailed {
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Confirmed {
        invoice: ConfirmedInvoice,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for ImportedInvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ImportedInvoiceEvent::Uploaded { .. } => "invoicing.imported_invoice.uploaded",
            ImportedInvoiceEvent::ExtractionStarted { .. } => "invoicing.imported_invoice.extraction_started",
            ImportedInvoiceEvent::Extracted { .. } => "invoicing.imported_invoice.extracted",
            ImportedInvoiceEvent::ExtractionFailed { .. } => "invoicing.imported_invoice.extraction_failed",
            ImportedInvoiceEvent::Confirmed { .. } => "invoicing.imported_invoice.confirmed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ImportedInvoiceEvent::Uploaded { occurred_at, .. }
            | ImportedInvoiceEvent::ExtractionStarted { occurred_at, .. }
            | ImportedInvoiceEvent::Extracted { occurred_at, .. }
            | ImportedInvoiceEvent::ExtractionFailed { occurred_at, .. }
            | ImportedInvoiceEvent::Confirmed { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for ImportedInvoice {
    type Command = ImportedInvoiceCommand;
    type Event = ImportedInvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ImportedInvoiceEvent::Uploaded {
                tenant_id,
                imported_invoice_id,
                file,
                occurred_at,
            } => {
                self.id = *imported_invoice_id;
                self.tenant_id = Some(*tenant_id);
                self.file = Some(file.clone());
                self.status = ImportStatus::Pending;
                self.uploaded_at = Some(*occurred_at);
            }
            ImportedInvoiceEvent::ExtractionStarted { attempt, .. } => {
                self.status = ImportStatus::Extracting;
                self.attempts = *attempt;
                self.failure_reason = None;
            }
            ImportedInvoiceEvent::Extracted {
                source,
                data,
                suggested_customer,
                ..
            } => {
                self.status = ImportStatus::Extracted;
                self.source = Some(*source);
                self.extracted = Some(data.clone());
                self.suggested_customer = suggested_customer.clone();
            }
            ImportedInvoiceEvent::ExtractionFailed { reason, .. } => {
                self.status = ImportStatus::ExtractionFailed;
                self.failure_reason = Some(reason.clone());
            }
            ImportedInvoiceEvent::Confirmed { invoice, .. } => {
                self.status = ImportStatus::Confirmed;
                self.confirmed = Some(invoice.clone());
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ImportedInvoiceCommand::Upload {
                tenant_id,
                imported_invoice_id,
                file,
                occurred_at,
            } => {
                if self.file.is_some() {
                    return Err(DomainError::conflict("imported invoice already exists"));
                }
                if file.content_hash.is_empty() || file.storage_key.is_empty() {
                    return Err(DomainError::validation("stored file is incomplete"));
                }
                Ok(vec![ImportedInvoiceEvent::Uploaded {
                    tenant_id: *tenant_id,
                    imported_invoice_id: *imported_invoice_id,
                    file: file.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            ImportedInvoiceCommand::StartExtraction {
                tenant_id,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if !self.status.can_start_extraction() {
                    return Err(self.transition_error(ImportStatus::Extracting));
                }
                Ok(vec![ImportedInvoiceEvent::ExtractionStarted {
                    attempt: self.attempts + 1,
                    occurred_at: *occurred_at,
                }])
            }
            ImportedInvoiceCommand::CompleteExtraction {
                tenant_id,
                source,
                data,
                suggested_customer,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status != ImportStatus::Extracting {
                    return Err(self.transition_error(ImportStatus::Extracted));
                }
                Ok(vec![ImportedInvoiceEvent::Extracted {
                    source: *source,
                    data: data.clone(),
                    suggested_customer: suggested_customer.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            ImportedInvoiceCommand::FailExtraction {
                tenant_id,
                reason,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status != ImportStatus::Extracting {
                    return Err(self.transition_error(ImportStatus::ExtractionFailed));
                }
                let reason = reason.trim();
                Ok(vec![ImportedInvoiceEvent::ExtractionFailed {
                    reason: if reason.is_empty() { "unknown error".into() } else { reason.to_string() },
                    occurred_at: *occurred_at,
                }])
            }
            ImportedInvoiceCommand::Confirm {
                tenant_id,
                corrections,
                customer_id,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status != ImportStatus::Extracted {
                    return Err(self.transition_error(ImportStatus::Confirmed));
                }
                let base = self.extracted.clone().unwrap_or_default();
                let customer_id =
                    customer_id.or_else(|| self.suggested_customer.as_ref().map(|m| m.customer_id));
                let invoice = ConfirmedInvoice::from_data(&base.merged(corrections), customer_id)?;
                Ok(vec![ImportedInvoiceEvent::Confirmed {
                    invoice,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl Auditable for ImportedInvoice {
    const ENTITY_TYPE: &'static str = "imported_invoice";

    fn audit_snapshot(&self) -> Option<JsonValue> {
        let file = self.file.as_ref()?;
        Some(json!({
            "filename": file.filename,
            "content_hash": file.content_hash,
            "status": self.status,
            "attempts": self.attempts,
            "failure_reason": self.failure_reason,
            "extracted": self.extracted,
            "confirmed": self.confirmed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> StoredFile {
        StoredFile {
            filename: "rechnung.pdf".into(),
            kind: FileKind::Pdf,
            content_hash: "ab".repeat(32),
            storage_key: format!("ab/{}", "ab".repeat(32)),
            size_bytes: 1024,
        }
    }

    fn uploaded(tenant_id: TenantId) -> ImportedInvoice {
        let id = ImportedInvoiceId::generate();
        let mut inv = ImportedInvoice::empty(id);
        run(&mut inv, ImportedInvoiceCommand::Upload {
            tenant_id,
            imported_invoice_id: id,
            file: file(),
            occurred_at: Utc::now(),
        })
        .unwrap();
        inv
    }

    fn run(inv: &mut ImportedInvoice, cmd: ImportedInvoiceCommand) -> Result<(), DomainError> {
        for e in inv.handle(&cmd)? {
            inv.apply(&e);
        }
        Ok(())
    }

    fn start(t: TenantId) -> ImportedInvoiceCommand {
        ImportedInvoiceCommand::StartExtraction { tenant_id: t, occurred_at: Utc::now() }
    }

    fn data() -> InvoiceData {
        InvoiceData {
            invoice_number: Some("R-1".into()),
            invoice_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            gross_amount: Some(11_900),
            ..InvoiceData::default()
        }
    }

    #[test]
    fn failed_extraction_can_be_retried_and_counts_attempts() {
        let t = TenantId::new();
        let mut inv = uploaded(t);
        run(&mut inv, start(t)).unwrap();
        assert!(run(&mut inv, start(t)).is_err());
        run(&mut inv, ImportedInvoiceCommand::FailExtraction {
            tenant_id: t,
            reason: "timeout".into(),
            occurred_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(inv.status(), ImportStatus::ExtractionFailed);
        assert_eq!(inv.failure_reason(), Some("timeout"));

        run(&mut inv, start(t)).unwrap();
        assert_eq!(inv.attempts(), 2);
        assert_eq!(inv.failure_reason(), None);
    }

    #[test]
    fn confirm_requires_extracted_state_and_mandatory_fields() {
        let t = TenantId::new();
        let mut inv = uploaded(t);
        let confirm = |corrections: InvoiceData| ImportedInvoiceCommand::Confirm {
            tenant_id: t,
            corrections,
            customer_id: None,
            occurred_at: Utc::now(),
        };
        assert!(matches!(run(&mut inv, confirm(data())), Err(DomainError::Conflict(_))));

        run(&mut inv, start(t)).unwrap();
        run(&mut inv, ImportedInvoiceCommand::CompleteExtraction {
            tenant_id: t,
            source: ExtractionSource::Llm,
            data: InvoiceData { gross_amount: None, ..data() },
            suggested_customer: None,
            occurred_at: Utc::now(),
        })
        .unwrap();

        assert!(matches!(run(&mut inv, confirm(InvoiceData::default())), Err(DomainError::Validation(_))));
        run(&mut inv, confirm(InvoiceData { gross_amount: Some(500), ..InvoiceData::default() })).unwrap();
        assert_eq!(inv.status(), ImportStatus::Confirmed);
        assert_eq!(inv.confirmed().unwrap().gross_amount, Money::eur(500));

        // Terminal.
        assert!(run(&mut inv, start(t)).is_err());
    }

    #[test]
    fn extracted_invoices_can_be_re_extracted() {
        let t = TenantId::new();
        let mut inv = uploaded(t);
        run(&mut inv, start(t)).unwrap();
        run(&mut inv, ImportedInvoiceCommand::CompleteExtraction {
            tenant_id: t,
            source: ExtractionSource::Zugferd,
            data: data(),
            suggested_customer: None,
            occurred_at: Utc::now(),
        })
        .unwrap();
        run(&mut inv, start(t)).unwrap();
        assert_eq!(inv.status(), ImportStatus::Extracting);
    }

    #[test]
    fn status_serializes_screaming() {
        assert_eq!(serde_json::to_string(&ImportStatus::ExtractionFailed).unwrap(), "\"EXTRACTION_FAILED\"");
    }
}
