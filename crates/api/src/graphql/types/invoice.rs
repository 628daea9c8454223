use async_graphql::{ID, Object, SimpleObject};
use chrono::NaiveDate;

use kontor_core::AggregateRoot;
use kontor_invoicing::{Invoice as DomainInvoice, InvoiceLine as DomainLine, NumberScheme as DomainScheme};

use crate::graphql::types::Money;
use crate::graphql::types::contract::BillingPeriod;
use crate::graphql::types::enums::{InvoiceStatus, ResetPeriod};

#[derive(Clone)]
pub struct Invoice {
    pub inner: DomainInvoice,
}

impl From<DomainInvoice> for Invoice {
    fn from(invoice: DomainInvoice) -> Self {
        Self { inner: invoice }
    }
}

#[Object]
impl Invoice {
    async fn id(&self) -> ID {
        ID(self.inner.id().to_string())
    }

    /// Formatted from the tenant's number scheme at issue time.
    async fn number(&self) -> &str {
        self.inner.number()
    }

    async fn customer_id(&self) -> Option<ID> {
        self.inner.customer_id().map(|id| ID(id.to_string()))
    }

    async fn contract_id(&self) -> Option<ID> {
        self.inner.contract().map(|c| ID(c.contract_id.to_string()))
    }

    /// The contract period this invoice bills, if any.
    async fn billing_period(&self) -> Option<BillingPeriod> {
        self.inner.contract().map(|c| BillingPeriod::new(c.period, None))
    }

    async fn status(&self) -> InvoiceStatus {
        self.inner.status().into()
    }

    async fn lines(&self) -> Vec<InvoiceLine> {
        self.inner.lines().iter().map(InvoiceLine::from).collect()
    }

    async fn issue_date(&self) -> Option<NaiveDate> {
        self.inner.issue_date()
    }

    async fn due_date(&self) -> Option<NaiveDate> {
        self.inner.due_date()
    }

    async fn net(&self) -> Option<Money> {
        self.inner.totals().map(|t| t.net.into())
    }

    async fn tax(&self) -> Option<Money> {
        self.inner.totals().map(|t| t.tax.into())
    }

    async fn gross(&self) -> Option<Money> {
        self.inner.totals().map(|t| t.gross.into())
    }

    async fn total_paid(&self) -> Money {
        self.inner.total_paid().into()
    }

    async fn outstanding(&self) -> Money {
        self.inner.outstanding().into()
    }
}

#[derive(SimpleObject)]
pub struct InvoiceLine {
    pub description: String,
    pub product_id: Option<ID>,
    pub quantity: String,
    pub unit_price: Money,
    pub tax_rate_bp: u32,
}

impl From<&DomainLine> for InvoiceLine {
    fn from(line: &DomainLine) -> Self {
        Self {
            description: line.description.clone(),
            product_id: line.product_id.map(|id| ID(id.to_string())),
            quantity: line.quantity.to_string(),
            unit_price: line.unit_price.into(),
            tax_rate_bp: line.tax_rate_bp,
        }
    }
}

/// The tenant's invoice number scheme.
#[derive(SimpleObject)]
pub struct NumberScheme {
    /// e.g. `RE-{YYYY}-{NUMBER:4}`.
    pub pattern: String,
    pub reset_period: ResetPeriod,
    /// Last issued number in the current period.
    pub counter: u64,
    /// `YYYY` or `YYYY-MM` of the last issued number.
    pub period_key: Option<String>,
}

impl From<DomainScheme> for NumberScheme {
    fn from(scheme: DomainScheme) -> Self {
        Self {
            pattern: scheme.pattern.as_str().to_string(),
            reset_period: scheme.reset_period.into(),
            counter: scheme.counter,
            period_key: scheme.period_key.map(|k| k.to_string()),
        }
    }
}
