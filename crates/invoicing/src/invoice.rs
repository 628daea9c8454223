use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use kontor_contracts::{BillingPeriod, Contract, ContractId, PeriodTotals, billing};
use kontor_core::{
    Aggregate, AggregateRoot, Auditable, Currency, DomainError, Money, Quantity, TenantId,
    typed_aggregate_id,
};
use kontor_customers::CustomerId;
use kontor_events::Event;
use kontor_products::ProductId;

typed_aggregate_id!(
    /// Invoice identifier (tenant-scoped via `tenant_id` fields in events/commands).
    InvoiceId
);

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub product_id: Option<ProductId>,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub tax_rate_bp: u32,
}

/// Link from an invoice to the contract period it bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractBilling {
    pub contract_id: ContractId,
    pub period: BillingPeriod,
}

/// Lines for one billing period of `contract`, each description suffixed with the period.
pub fn contract_period_lines(contract: &Contract, index: u32) -> Result<Vec<InvoiceLine>, DomainError> {
    let period = contract.period(index).ok_or_else(DomainError::not_found)?;
    let suffix = format!(
        "{} - {}",
        period.start.format("%d.%m.%Y"),
        period.end.format("%d.%m.%Y")
    );
    let lines: Vec<InvoiceLine> = contract
        .period_items(index)
        .into_iter()
        .map(|item| InvoiceLine {
            description: format!("{}, {suffix}", item.description),
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            tax_rate_bp: item.tax_rate_bp,
        })
        .collect();
    if lines.is_empty() {
        return Err(DomainError::invariant("period has nothing to bill"));
    }
    Ok(lines)
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    number: String,
    customer_id: Option<CustomerId>,
    contract: Option<ContractBilling>,
    status: InvoiceStatus,
    lines: Vec<InvoiceLine>,
    issue_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    totals: Option<PeriodTotals>,
    total_paid: i64,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            number: String::new(),
            customer_id: None,
            contract: None,
            status: InvoiceStatus::Open,
            lines: Vec::new(),
            issue_date: None,
            due_date: None,
            totals: None,
            total_paid: 0,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn contract(&self) -> Option<ContractBilling> {
        self.contract
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn issue_date(&self) -> Option<NaiveDate> {
        self.issue_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn totals(&self) -> Option<PeriodTotals> {
        self.totals
    }

    pub fn currency(&self) -> Currency {
        self.totals.map(|t| t.gross.currency).unwrap_or(Currency::EUR)
    }

    pub fn total_paid(&self) -> Money {
        Money::new(self.total_paid, self.currency())
    }

    /// Gross minus payments; zero for cancelled invoices.
    pub fn outstanding(&self) -> Money {
        let gross = self.totals.map(|t| t.gross.cents).unwrap_or(0);
        let cents = match self.status {
            InvoiceStatus::Cancelled => 0,
            _ => gross.saturating_sub(self.total_paid),
        };
        Money::new(cents, self.currency())
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    /// Allocated from the tenant's number scheme before dispatch.
    pub number: String,
    pub customer_id: CustomerId,
    pub contract: Option<ContractBilling>,
    pub lines: Vec<InvoiceLine>,
    pub issue_date: NaiveDate,
    pub payment_terms_days: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub tenant_id: TenantId,
    pub amount: Money,
    pub paid_on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub tenant_id: TenantId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    Issue(IssueInvoice),
    RegisterPayment(RegisterPayment),
    Cancel(CancelInvoice),
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub number: String,
    pub customer_id: CustomerId,
    pub contract: Option<ContractBilling>,
    pub lines: Vec<InvoiceLine>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub totals: PeriodTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub amount: Money,
    pub new_total_paid: Money,
    pub paid_on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    Issued(InvoiceIssued),
    PaymentRegistered(PaymentRegistered),
    Cancelled(InvoiceCancelled),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::Issued(_) => "invoicing.invoice.issued",
            InvoiceEvent::PaymentRegistered(_) => "invoicing.invoice.payment_registered",
            InvoiceEvent::Cancelled(_) => "invoicing.invoice.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::Issued(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered(e) => e.occurred_at,
            InvoiceEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::Issued(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.number = e.number.clone();
                self.customer_id = Some(e.customer_id);
                self.contract = e.contract;
                self.lines = e.lines.clone();
                self.issue_date = Some(e.issue_date);
                self.due_date = Some(e.due_date);
                self.totals = Some(e.totals);
                self.total_paid = 0;
                self.status = InvoiceStatus::Open;
                self.created = true;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.total_paid = e.new_total_paid.cents;
                if self.totals.is_some_and(|t| self.total_paid >= t.gross.cents) {
                    self.status = InvoiceStatus::Paid;
                }
            }
            InvoiceEvent::Cancelled(_) => {
                self.status = InvoiceStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::Issue(cmd) => self.handle_issue(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            InvoiceCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Invoice {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::TenantMismatch);
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("invoice number cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("cannot issue invoice without lines"));
        }

        let currency = cmd.lines[0].unit_price.currency;
        let mut lines = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            let description = line.description.trim();
            if description.is_empty() {
                return Err(DomainError::validation("invoice line description cannot be empty"));
            }
            if !line.quantity.is_positive() {
                return Err(DomainError::validation("invoice line quantity must be positive"));
            }
            if line.unit_price.is_negative() {
                return Err(DomainError::validation("invoice line unit price cannot be negative"));
            }
            if line.tax_rate_bp > kontor_products::product::MAX_TAX_RATE_BP {
                return Err(DomainError::validation("tax rate cannot exceed 100 %"));
            }
            lines.push(InvoiceLine {
                description: description.to_string(),
                ..line.clone()
            });
        }

        let totals = billing::totals(
            lines.iter().map(|l| (l.quantity, l.unit_price, l.tax_rate_bp)),
            Money::zero(currency),
        )?;
        let due_date = cmd.issue_date + Duration::days(i64::from(cmd.payment_terms_days));

        Ok(vec![InvoiceEvent::Issued(InvoiceIssued {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            number: cmd.number.trim().to_string(),
            customer_id: cmd.customer_id,
            contract: cmd.contract,
            lines,
            issue_date: cmd.issue_date,
            due_date,
            totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(&self, cmd: &RegisterPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;

        if self.status != InvoiceStatus::Open {
            return Err(DomainError::invariant(
                "cannot register payment on cancelled or fully paid invoice",
            ));
        }
        if cmd.amount.cents <= 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let new_total_paid = self.total_paid().checked_add(cmd.amount)?;
        if new_total_paid.cents > self.totals.map(|t| t.gross.cents).unwrap_or(0) {
            return Err(DomainError::invariant("cannot overpay invoice"));
        }

        Ok(vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            amount: cmd.amount,
            new_total_paid,
            paid_on: cmd.paid_on,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;

        match self.status {
            InvoiceStatus::Cancelled => Err(DomainError::conflict("invoice is already cancelled")),
            InvoiceStatus::Paid => Err(DomainError::invariant("cannot cancel a paid invoice")),
            InvoiceStatus::Open if self.total_paid > 0 => Err(DomainError::invariant(
                "cannot cancel an invoice with registered payments",
            )),
            InvoiceStatus::Open => Ok(vec![InvoiceEvent::Cancelled(InvoiceCancelled {
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            })]),
        }
    }
}

impl Auditable for Invoice {
    const ENTITY_TYPE: &'static str = "invoice";

    fn audit_snapshot(&self) -> Option<JsonValue> {
        if !self.created {
            return None;
        }
        Some(json!({
            "number": self.number,
            "customer_id": self.customer_id,
            "contract": self.contract,
            "status": self.status,
            "lines": self.lines,
            "issue_date": self.issue_date,
            "due_date": self.due_date,
            "totals": self.totals,
            "total_paid": self.total_paid,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kontor_contracts::{BillingInterval, ContractCommand, ContractItem, ContractTerms};
    use kontor_core::AggregateId;
    use kontor_products::BillingType;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn line(cents: i64, qty: &str) -> InvoiceLine {
        InvoiceLine {
            description: "Consulting".into(),
            product_id: None,
            quantity: qty.parse().unwrap(),
            unit_price: Money::eur(cents),
            tax_rate_bp: 1_900,
        }
    }

    fn issue(tenant_id: TenantId, lines: Vec<InvoiceLine>) -> Invoice {
        let invoice_id = InvoiceId::generate();
        let mut invoice = Invoice::empty(invoice_id);
        let cmd = IssueInvoice {
            tenant_id,
            invoice_id,
            number: "RE-2024-0001".into(),
            customer_id: CustomerId::generate(),
            contract: None,
            lines,
            issue_date: d(2024, 3, 1),
            payment_terms_days: 14,
            occurred_at: Utc::now(),
        };
        for e in invoice.handle(&InvoiceCommand::Issue(cmd)).unwrap() {
            invoice.apply(&e);
        }
        invoice
    }

    fn pay(invoice: &Invoice, tenant_id: TenantId, cents: i64) -> Result<Vec<InvoiceEvent>, DomainError> {
        invoice.handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
            tenant_id,
            amount: Money::eur(cents),
            paid_on: d(2024, 3, 10),
            occurred_at: Utc::now(),
        }))
    }

    #[test]
    fn issue_computes_totals_and_due_date() {
        let invoice = issue(TenantId::new(), vec![line(10_000, "1.5"), line(999, "1")]);
        let totals = invoice.totals().unwrap();
        assert_eq!(totals.net, Money::eur(15_999));
        // 2850 + 189.81 -> 190
        assert_eq!(totals.tax, Money::eur(3_040));
        assert_eq!(totals.gross, Money::eur(19_039));
        assert_eq!(invoice.due_date(), Some(d(2024, 3, 15)));
        assert_eq!(invoice.status(), InvoiceStatus::Open);
    }

    #[test]
    fn mixed_currencies_are_rejected() {
        let mut usd = line(100, "1");
        usd.unit_price = Money::new(100, "USD".parse().unwrap());
        let invoice = Invoice::empty(InvoiceId::generate());
        let err = invoice
            .handle(&InvoiceCommand::Issue(IssueInvoice {
                tenant_id: TenantId::new(),
                invoice_id: InvoiceId::generate(),
                number: "1".into(),
                customer_id: CustomerId::generate(),
                contract: None,
                lines: vec![line(100, "1"), usd],
                issue_date: d(2024, 1, 1),
                payment_terms_days: 0,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn partial_then_full_payment_marks_paid_and_overpay_fails() {
        let tenant_id = TenantId::new();
        let mut invoice = issue(tenant_id, vec![line(10_000, "1")]);
        assert!(matches!(
            pay(&invoice, tenant_id, 11_901),
            Err(DomainError::InvariantViolation(msg)) if msg.contains("overpay")
        ));

        for e in pay(&invoice, tenant_id, 5_000).unwrap() {
            invoice.apply(&e);
        }
        assert_eq!(invoice.outstanding(), Money::eur(6_900));
        for e in pay(&invoice, tenant_id, 6_900).unwrap() {
            invoice.apply(&e);
        }
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert!(pay(&invoice, tenant_id, 1).is_err());
    }

    #[test]
    fn paid_invoices_cannot_be_cancelled() {
        let tenant_id = TenantId::new();
        let mut invoice = issue(tenant_id, vec![line(100, "1")]);
        for e in pay(&invoice, tenant_id, 119).unwrap() {
            invoice.apply(&e);
        }
        let cancel = InvoiceCommand::Cancel(CancelInvoice {
            tenant_id,
            reason: None,
            occurred_at: Utc::now(),
        });
        assert!(matches!(invoice.handle(&cancel), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn cancelled_invoices_have_nothing_outstanding() {
        let tenant_id = TenantId::new();
        let mut invoice = issue(tenant_id, vec![line(100, "1")]);
        let cancel = InvoiceCommand::Cancel(CancelInvoice {
            tenant_id,
            reason: Some("duplicate".into()),
            occurred_at: Utc::now(),
        });
        for e in invoice.handle(&cancel).unwrap() {
            invoice.apply(&e);
        }
        assert_eq!(invoice.outstanding(), Money::eur(0));
        assert!(matches!(invoice.handle(&cancel), Err(DomainError::Conflict(_))));
        assert!(pay(&invoice, tenant_id, 1).is_err());
    }

    #[test]
    fn other_tenants_cannot_touch_the_invoice() {
        let invoice = issue(TenantId::new(), vec![line(100, "1")]);
        assert!(pay(&invoice, TenantId::new(), 1).is_err());
    }

    #[test]
    fn contract_lines_carry_period_and_skip_one_time_items_later() {
        let tenant_id = TenantId::new();
        let contract_id = kontor_contracts::ContractId::generate();
        let mut contract = Contract::empty(contract_id);
        let item = |billing_type| ContractItem {
            product_id: Some(ProductId::new(AggregateId::new())),
            description: "Hosting".into(),
            quantity: Quantity::ONE,
            unit_price: Money::eur(5_000),
            tax_rate_bp: 1_900,
            billing_type,
        };
        let terms = ContractTerms {
            customer_id: CustomerId::generate(),
            title: "Hosting".into(),
            items: vec![item(BillingType::Recurring), item(BillingType::OneTime)],
            interval: BillingInterval::Quarterly,
            start_date: d(2024, 1, 1),
            end_date: None,
            notice_period_months: 1,
            payment_terms_days: 30,
        };
        for cmd in [
            ContractCommand::Create { tenant_id, contract_id, terms, occurred_at: Utc::now() },
            ContractCommand::Activate { tenant_id, occurred_at: Utc::now() },
        ] {
            for e in contract.handle(&cmd).unwrap() {
                contract.apply(&e);
            }
        }

        let first = contract_period_lines(&contract, 0).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].description, "Hosting, 01.01.2024 - 31.03.2024");
        assert_eq!(contract_period_lines(&contract, 1).unwrap().len(), 1);
    }
}
