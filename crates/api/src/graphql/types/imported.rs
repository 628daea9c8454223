use async_graphql::{ID, Object, SimpleObject};
use chrono::{DateTime, NaiveDate, Utc};

use kontor_core::AggregateRoot;
use kontor_invoicing::{ConfirmedInvoice as DomainConfirmed, ImportedInvoice as DomainImported, InvoiceData as DomainData};

use crate::graphql::types::enums::{ExtractionSource, FileKind, ImportStatus};
use crate::graphql::types::{CustomerMatch, Money};

/// An uploaded incoming invoice and where its extraction stands.
#[derive(Clone)]
pub struct ImportedInvoice {
    pub inner: DomainImported,
}

impl From<DomainImported> for ImportedInvoice {
    fn from(record: DomainImported) -> Self {
        Self { inner: record }
    }
}

#[Object]
impl ImportedInvoice {
    async fn id(&self) -> ID {
        ID(self.inner.id().to_string())
    }

    async fn filename(&self) -> Option<&str> {
        self.inner.file().map(|f| f.filename.as_str())
    }

    async fn kind(&self) -> Option<FileKind> {
        self.inner.file().map(|f| f.kind.into())
    }

    /// Hex SHA-256 of the upload.
    async fn content_hash(&self) -> Option<&str> {
        self.inner.file().map(|f| f.content_hash.as_str())
    }

    async fn size_bytes(&self) -> Option<u64> {
        self.inner.file().map(|f| f.size_bytes)
    }

    /// Relative download path.
    async fn file_url(&self) -> String {
        format!("/api/imported-invoices/{}/file", self.inner.id())
    }

    async fn status(&self) -> ImportStatus {
        self.inner.status().into()
    }

    async fn attempts(&self) -> u32 {
        self.inner.attempts()
    }

    async fn source(&self) -> Option<ExtractionSource> {
        self.inner.source().map(Into::into)
    }

    async fn extracted(&self) -> Option<InvoiceData> {
        self.inner.extracted().map(InvoiceData::from)
    }

    async fn failure_reason(&self) -> Option<&str> {
        self.inner.failure_reason()
    }

    /// Best customer match for the extracted vendor.
    async fn suggested_customer(&self) -> Option<CustomerMatch> {
        self.inner.suggested_customer().cloned().map(Into::into)
    }

    async fn confirmed(&self) -> Option<ConfirmedInvoice> {
        self.inner.confirmed().map(ConfirmedInvoice::from)
    }

    async fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        self.inner.uploaded_at()
    }
}

/// Extracted metadata; amounts in cents.
#[derive(SimpleObject)]
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

impl From<&DomainData> for InvoiceData {
    fn from(data: &DomainData) -> Self {
        let data = data.clone();
        Self {
            invoice_number: data.invoice_number,
            invoice_date: data.invoice_date,
            due_date: data.due_date,
            vendor_name: data.vendor_name,
            vendor_vat_id: data.vendor_vat_id,
            vendor_iban: data.vendor_iban,
            currency: data.currency,
            net_amount: data.net_amount,
            tax_amount: data.tax_amount,
            gross_amount: data.gross_amount,
        }
    }
}

#[derive(SimpleObject)]
pub struct ConfirmedInvoice {
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub vendor_name: Option<String>,
    pub customer_id: Option<ID>,
    pub net_amount: Option<Money>,
    pub tax_amount: Option<Money>,
    pub gross_amount: Money,
}

impl From<&DomainConfirmed> for ConfirmedInvoice {
    fn from(c: &DomainConfirmed) -> Self {
        Self {
            invoice_number: c.invoice_number.clone(),
            invoice_date: c.invoice_date,
            due_date: c.due_date,
            vendor_name: c.vendor_name.clone(),
            customer_id: c.customer_id.map(|id| ID(id.to_string())),
            net_amount: c.net_amount.map(Into::into),
            tax_amount: c.tax_amount.map(Into::into),
            gross_amount: c.gross_amount.into(),
        }
    }
}
