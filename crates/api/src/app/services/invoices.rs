//! Outgoing invoices, contract billing and the number scheme.
//!
//! Numbers are allocated before the `Issue` command runs. If the command then fails, that
//! number is skipped; numbers stay unique and increasing but may have gaps.

use chrono::{NaiveDate, Utc};

use kontor_auth::permissions::names;
use kontor_contracts::{Contract, ContractCommand, ContractId, ContractStatus};
use kontor_core::{AggregateRoot, DomainError, Money, Quantity};
use kontor_customers::{CustomerId, CustomerStatus};
use kontor_infra::numbering::NumberSchemeStore;
use kontor_infra::projections::aggregate_types;
use kontor_invoicing::{
    CancelInvoice, ContractBilling, Invoice, InvoiceCommand, InvoiceId, InvoiceLine, InvoiceStatus, IssueInvoice,
    NumberScheme, RegisterPayment, SchemeUpdate, contract_period_lines,
};
use kontor_products::ProductId;

use super::AppServices;
use crate::app::errors::ApiError;
use crate::context::Session;

const DEFAULT_PAYMENT_TERMS_DAYS: u32 = 14;

/// A line as requested by the client. With a product, missing fields are taken from it.
#[derive(Debug, Clone)]
pub struct RequestedLine {
    pub product_id: Option<ProductId>,
    pub description: Option<String>,
    pub quantity: Quantity,
    pub unit_price: Option<Money>,
    pub tax_rate_bp: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub customer_id: CustomerId,
    pub lines: Vec<RequestedLine>,
    pub issue_date: Option<NaiveDate>,
    pub payment_terms_days: Option<u32>,
}

impl AppServices {
    pub fn invoices(
        &self,
        session: &Session,
        status: Option<InvoiceStatus>,
        customer_id: Option<CustomerId>,
    ) -> Result<Vec<Invoice>, ApiError> {
        self.authorize(session, &names::INVOICES_READ)?;
        let mut invoices = self.projections.invoices.list_where(session.tenant_id(), |i| {
            i.is_created()
                && status.is_none_or(|s| i.status() == s)
                && customer_id.is_none_or(|c| i.customer_id() == Some(c))
        });
        invoices.sort_by(|a, b| b.issue_date().cmp(&a.issue_date()).then_with(|| b.number().cmp(a.number())));
        Ok(invoices)
    }

    pub fn invoice(&self, session: &Session, invoice_id: InvoiceId) -> Result<Invoice, ApiError> {
        self.authorize(session, &names::INVOICES_READ)?;
        self.invoice_record(session, invoice_id)
    }

    fn invoice_record(&self, session: &Session, invoice_id: InvoiceId) -> Result<Invoice, ApiError> {
        self.projections
            .invoices
            .get(session.tenant_id(), invoice_id.aggregate_id())
            .filter(Invoice::is_created)
            .ok_or_else(|| ApiError::not_found("invoice"))
    }

    /// Issue an invoice from explicit lines.
    #[tracing::instrument(skip_all, fields(tenant_id = %session.tenant_id()))]
    pub async fn issue_invoice(&self, session: &Session, request: IssueRequest) -> Result<Invoice, ApiError> {
        self.authorize(session, &names::INVOICES_WRITE)?;
        let customer = self.customer_record(session, request.customer_id)?;
        if customer.status() == CustomerStatus::Archived {
            return Err(ApiError::validation("cannot invoice an archived customer"));
        }
        let lines = request
            .lines
            .into_iter()
            .map(|line| self.resolve_line(session, line))
            .collect::<Result<Vec<_>, _>>()?;

        let issue_date = request.issue_date.unwrap_or_else(|| Utc::now().date_naive());
        self.issue(
            session,
            request.customer_id,
            None,
            lines,
            issue_date,
            request.payment_terms_days.unwrap_or(DEFAULT_PAYMENT_TERMS_DAYS),
        )
        .await
    }

    fn resolve_line(&self, session: &Session, line: RequestedLine) -> Result<InvoiceLine, ApiError> {
        let product = match line.product_id {
            Some(id) => {
                let product = self.product_record(session, id)?;
                if !product.is_billable() {
                    return Err(ApiError::validation(format!("product {id} is archived")));
                }
                product.details().cloned()
            }
            None => None,
        };

        let description = line
            .description
            .or_else(|| product.as_ref().map(|p| p.name.clone()))
            .ok_or_else(|| ApiError::validation("line needs a description or a product"))?;
        let unit_price = line
            .unit_price
            .or_else(|| product.as_ref().map(|p| p.net_price))
            .ok_or_else(|| ApiError::validation("line needs a unit price or a product"))?;
        let tax_rate_bp = line
            .tax_rate_bp
            .or_else(|| product.as_ref().map(|p| p.tax_rate_bp))
            .unwrap_or_default();

        Ok(InvoiceLine {
            description,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price,
            tax_rate_bp,
        })
    }

    async fn issue(
        &self,
        session: &Session,
        customer_id: CustomerId,
        contract: Option<ContractBilling>,
        lines: Vec<InvoiceLine>,
        issue_date: NaiveDate,
        payment_terms_days: u32,
    ) -> Result<Invoice, ApiError> {
        let tenant_id = session.tenant_id();
        let number = self.numbers.allocate(tenant_id, issue_date).await?;
        let invoice_id = InvoiceId::generate();

        let invoice = self.execute(
            tenant_id,
            Some(session.user_id()),
            invoice_id.aggregate_id(),
            aggregate_types::INVOICE,
            InvoiceCommand::Issue(IssueInvoice {
                tenant_id,
                invoice_id,
                number,
                customer_id,
                contract,
                lines,
                issue_date,
                payment_terms_days,
                occurred_at: Utc::now(),
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )?;
        tracing::info!(invoice_id = %invoice.id(), number = %invoice.number(), "invoice issued");
        Ok(invoice)
    }

    /// Invoice every unbilled period of one contract that starts on or before `until`.
    #[tracing::instrument(skip_all, fields(contract_id = %contract_id))]
    pub async fn bill_contract(
        &self,
        session: &Session,
        contract_id: ContractId,
        until: Option<NaiveDate>,
    ) -> Result<Vec<Invoice>, ApiError> {
        self.authorize(session, &names::INVOICES_WRITE)?;
        let contract = self.contract_record(session, contract_id)?;
        let until = until.unwrap_or_else(|| Utc::now().date_naive());
        self.bill_periods(session, contract, until).await
    }

    /// Run billing for every active or cancelled (still running) contract.
    pub async fn bill_due_contracts(&self, session: &Session, until: Option<NaiveDate>) -> Result<Vec<Invoice>, ApiError> {
        self.authorize(session, &names::INVOICES_WRITE)?;
        let until = until.unwrap_or_else(|| Utc::now().date_naive());
        let contracts: Vec<Contract> = self
            .projections
            .contracts
            .list(session.tenant_id())
            .into_iter()
            .filter(|c| matches!(c.status(), ContractStatus::Active | ContractStatus::Cancelled))
            .collect();

        let mut issued = Vec::new();
        for contract in contracts {
            issued.extend(self.bill_periods(session, contract, until).await?);
        }
        Ok(issued)
    }

    async fn bill_periods(&self, session: &Session, contract: Contract, until: NaiveDate) -> Result<Vec<Invoice>, ApiError> {
        let Some(terms) = contract.terms().cloned() else {
            return Ok(vec![]);
        };
        let contract_id = *contract.id();
        let today = Utc::now().date_naive();

        let mut issued = Vec::new();
        for period in contract.due_periods(until) {
            let invoice_id = match contract_period_lines(&contract, period.index) {
                Ok(lines) => {
                    let billing = ContractBilling { contract_id, period };
                    let invoice = self
                        .issue(session, terms.customer_id, Some(billing), lines, today, terms.payment_terms_days)
                        .await?;
                    let id = invoice.id().aggregate_id();
                    issued.push(invoice);
                    Some(id)
                }
                // One-time items only: the period still counts as billed.
                Err(DomainError::InvariantViolation(_)) => None,
                Err(e) => return Err(e.into()),
            };
            self.contract_command(
                session,
                contract_id,
                ContractCommand::MarkPeriodBilled {
                    tenant_id: session.tenant_id(),
                    period_index: period.index,
                    invoice_id,
                    occurred_at: Utc::now(),
                },
            )?;
        }
        if !issued.is_empty() {
            tracing::info!(count = issued.len(), "contract periods billed");
        }
        Ok(issued)
    }

    pub fn register_payment(
        &self,
        session: &Session,
        invoice_id: InvoiceId,
        amount: Money,
        paid_on: Option<NaiveDate>,
    ) -> Result<Invoice, ApiError> {
        self.authorize(session, &names::INVOICES_WRITE)?;
        let command = InvoiceCommand::RegisterPayment(RegisterPayment {
            tenant_id: session.tenant_id(),
            amount,
            paid_on: paid_on.unwrap_or_else(|| Utc::now().date_naive()),
            occurred_at: Utc::now(),
        });
        self.invoice_command(session, invoice_id, command)
    }

    pub fn cancel_invoice(&self, session: &Session, invoice_id: InvoiceId, reason: Option<String>) -> Result<Invoice, ApiError> {
        self.authorize(session, &names::INVOICES_WRITE)?;
        let command = InvoiceCommand::Cancel(CancelInvoice {
            tenant_id: session.tenant_id(),
            reason,
            occurred_at: Utc::now(),
        });
        self.invoice_command(session, invoice_id, command)
    }

    fn invoice_command(&self, session: &Session, invoice_id: InvoiceId, command: InvoiceCommand) -> Result<Invoice, ApiError> {
        self.invoice_record(session, invoice_id)?;
        self.execute(
            session.tenant_id(),
            Some(session.user_id()),
            invoice_id.aggregate_id(),
            aggregate_types::INVOICE,
            command,
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )
    }

    // ── number scheme ────────────────────────────────────────────────────────

    pub async fn number_scheme(&self, session: &Session) -> Result<NumberScheme, ApiError> {
        self.authorize(session, &names::INVOICES_READ)?;
        Ok(self.numbers.scheme(session.tenant_id()).await?)
    }

    pub async fn configure_number_scheme(&self, session: &Session, update: SchemeUpdate) -> Result<NumberScheme, ApiError> {
        self.authorize(session, &names::INVOICES_WRITE)?;
        let scheme = self.numbers.configure(session.tenant_id(), update).await?;
        tracing::info!(pattern = %scheme.pattern.as_str(), "number scheme configured");
        Ok(scheme)
    }

    pub async fn preview_invoice_number(&self, session: &Session, date: Option<NaiveDate>) -> Result<String, ApiError> {
        self.authorize(session, &names::INVOICES_READ)?;
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        Ok(self.numbers.preview(session.tenant_id(), date).await?)
    }
}
