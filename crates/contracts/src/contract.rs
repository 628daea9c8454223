//! Contract aggregate.
//!
//! Lifecycle: `draft → active ⇄ paused`, `active | paused → cancelled → ended`.
//! Cancelled contracts keep billing until their end date.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use kontor_core::{
    Aggregate, AggregateId, AggregateRoot, Auditable, Currency, DomainError, Money, Quantity, TenantId,
    typed_aggregate_id,
};
use kontor_customers::CustomerId;
use kontor_events::Event;
use kontor_products::{BillingType, ProductId};

use crate::billing::{self, BillingInterval, BillingPeriod, PeriodTotals, add_months};

typed_aggregate_id!(
    /// Contract identifier.
    ContractId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Cancelled,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractItem {
    pub product_id: Option<ProductId>,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub tax_rate_bp: u32,
    pub billing_type: BillingType,
}

/// Everything that can be negotiated while the contract is a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTerms {
    pub customer_id: CustomerId,
    pub title: String,
    pub items: Vec<ContractItem>,
    pub interval: BillingInterval,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub notice_period_months: u32,
    pub payment_terms_days: u32,
}

impl ContractTerms {
    fn validated(&self) -> Result<Self, DomainError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(DomainError::validation("contract title cannot be empty"));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("a contract needs at least one item"));
        }
        let currency = self.items[0].unit_price.currency;
        for item in &self.items {
            if item.description.trim().is_empty() {
                return Err(DomainError::validation("item description cannot be empty"));
            }
            if !item.quantity.is_positive() {
                return Err(DomainError::validation("item quantity must be positive"));
            }
            if item.unit_price.is_negative() {
                return Err(DomainError::validation("item price cannot be negative"));
            }
            if item.unit_price.currency != currency {
                return Err(DomainError::validation("all items must share one currency"));
            }
            if item.tax_rate_bp > kontor_products::product::MAX_TAX_RATE_BP {
                return Err(DomainError::validation("tax rate cannot exceed 100 %"));
            }
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(DomainError::validation("end date lies before start date"));
            }
        }
        if self.notice_period_months > 36 {
            return Err(DomainError::validation("notice period cannot exceed 36 months"));
        }
        if self.payment_terms_days > 365 {
            return Err(DomainError::validation("payment terms cannot exceed 365 days"));
        }

        let mut terms = self.clone();
        terms.title = title.to_string();
        for item in &mut terms.items {
            item.description = item.description.trim().to_string();
        }
        Ok(terms)
    }

    pub fn currency(&self) -> Currency {
        self.items
            .first()
            .map(|i| i.unit_price.currency)
            .unwrap_or(Currency::EUR)
    }
}

/// Aggregate root: Contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    id: ContractId,
    tenant_id: Option<TenantId>,
    terms: Option<ContractTerms>,
    status: ContractStatus,
    /// Number of periods already invoiced; the next due period has this index.
    billed_periods: u32,
    cancelled_on: Option<NaiveDate>,
    version: u64,
}

impl Contract {
    pub fn empty(id: ContractId) -> Self {
        Self {
            id,
            tenant_id: None,
            terms: None,
            status: ContractStatus::Draft,
            billed_periods: 0,
            cancelled_on: None,
            version: 0,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn terms(&self) -> Option<&ContractTerms> {
        self.terms.as_ref()
    }

    pub fn status(&self) -> ContractStatus {
        self.status
    }

    pub fn cancelled_on(&self) -> Option<NaiveDate> {
        self.cancelled_on
    }

    pub fn billed_periods(&self) -> u32 {
        self.billed_periods
    }

    fn bills(&self) -> bool {
        matches!(self.status, ContractStatus::Active | ContractStatus::Cancelled)
    }

    /// Start of the next period to invoice, if any remain.
    pub fn next_billing_date(&self) -> Option<NaiveDate> {
        let terms = self.terms.as_ref()?;
        if matches!(self.status, ContractStatus::Ended) {
            return None;
        }
        let start = billing::period_start(terms.start_date, terms.interval, self.billed_periods);
        match terms.end_date {
            Some(end) if start > end => None,
            _ => Some(start),
        }
    }

    pub fn period(&self, index: u32) -> Option<BillingPeriod> {
        let terms = self.terms.as_ref()?;
        Some(billing::period(terms.start_date, terms.interval, index, terms.end_date))
    }

    /// Unbilled periods starting on or before `until`. Paused and draft contracts bill nothing.
    pub fn due_periods(&self, until: NaiveDate) -> Vec<BillingPeriod> {
        let Some(terms) = self.terms.as_ref() else {
            return vec![];
        };
        if !self.bills() {
            return vec![];
        }

        let mut out = Vec::new();
        let mut index = self.billed_periods;
        loop {
            let p = billing::period(terms.start_date, terms.interval, index, terms.end_date);
            if p.start > until || terms.end_date.is_some_and(|end| p.start > end) {
                break;
            }
            out.push(p);
            index += 1;
        }
        out
    }

    /// Items billed in period `index`.
    pub fn period_items(&self, index: u32) -> Vec<&ContractItem> {
        self.terms
            .as_ref()
            .map(|t| {
                t.items
                    .iter()
                    .filter(|i| billing::bills_in_period(i.billing_type, index))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn period_totals(&self, index: u32) -> Result<PeriodTotals, DomainError> {
        let terms = self.terms.as_ref().ok_or_else(DomainError::not_found)?;
        billing::totals(
            self.period_items(index)
                .into_iter()
                .map(|i| (i.quantity, i.unit_price, i.tax_rate_bp)),
            Money::zero(terms.currency()),
        )
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<&ContractTerms, DomainError> {
        let terms = self.terms.as_ref().ok_or_else(DomainError::not_found)?;
        DomainError::check_tenant(self.tenant_id, tenant_id)?;
        Ok(terms)
    }

    fn transition_error(&self, action: &str) -> DomainError {
        DomainError::invariant(format!("cannot {action} a {:?} contract", self.status).to_lowercase())
    }
}

impl AggregateRoot for Contract {
    type Id = ContractId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCommand {
    Create {
        tenant_id: TenantId,
        contract_id: ContractId,
        terms: ContractTerms,
        occurred_at: DateTime<Utc>,
    },
    /// Replace the terms of a draft.
    Revise {
        tenant_id: TenantId,
        terms: ContractTerms,
        occurred_at: DateTime<Utc>,
    },
    Activate {
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
    Pause {
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
    Resume {
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
    /// Notice given on `notice_date`, effective at the end of `effective_end`.
    Cancel {
        tenant_id: TenantId,
        notice_date: NaiveDate,
        effective_end: NaiveDate,
        occurred_at: DateTime<Utc>,
    },
    End {
        tenant_id: TenantId,
        on: NaiveDate,
        occurred_at: DateTime<Utc>,
    },
    MarkPeriodBilled {
        tenant_id: TenantId,
        period_index: u32,
        /// `None` when the period had nothing to bill (one-time items only).
        invoice_id: Option<AggregateId>,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    Created {
        tenant_id: TenantId,
        contract_id: ContractId,
        terms: ContractTerms,
        occurred_at: DateTime<Utc>,
    },
    Revised {
        terms: ContractTerms,
        occurred_at: DateTime<Utc>,
    },
    Activated {
        occurred_at: DateTime<Utc>,
    },
    Paused {
        occurred_at: DateTime<Utc>,
    },
    Resumed {
        occurred_at: DateTime<Utc>,
    },
    Cancelled {
        notice_date: NaiveDate,
        effective_end: NaiveDate,
        occurred_at: DateTime<Utc>,
    },
    Ended {
        on: NaiveDate,
        occurred_at: DateTime<Utc>,
    },
    PeriodBilled {
        period_index: u32,
        /// `None` when the period had nothing to bill (one-time items only).
        invoice_id: Option<AggregateId>,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for ContractEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ContractEvent::Created { .. } => "contracts.contract.created",
            ContractEvent::Revised { .. } => "contracts.contract.revised",
            ContractEvent::Activated { .. } => "contracts.contract.activated",
            ContractEvent::Paused { .. } => "contracts.contract.paused",
            ContractEvent::Resumed { .. } => "contracts.contract.resumed",
            ContractEvent::Cancelled { .. } => "contracts.contract.cancelled",
            ContractEvent::Ended { .. } => "contracts.contract.ended",
            ContractEvent::PeriodBilled { .. } => "contracts.contract.period_billed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ContractEvent::Created { occurred_at, .. }
            | ContractEvent::Revised { occurred_at, .. }
            | ContractEvent::Activated { occurred_at }
            | ContractEvent::Paused { occurred_at }
            | ContractEvent::Resumed { occurred_at }
            | ContractEvent::Cancelled { occurred_at, .. }
            | ContractEvent::Ended { occurred_at, .. }
            | ContractEvent::PeriodBilled { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Contract {
    type Command = ContractCommand;
    type Event = ContractEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ContractEvent::Created {
                tenant_id,
                contract_id,
                terms,
                ..
            } => {
                self.id = *contract_id;
                self.tenant_id = Some(*tenant_id);
                self.terms = Some(terms.clone());
                self.status = ContractStatus::Draft;
            }
            ContractEvent::Revised { terms, .. } => self.terms = Some(terms.clone()),
            ContractEvent::Activated { .. } | ContractEvent::Resumed { .. } => {
                self.status = ContractStatus::Active;
            }
            ContractEvent::Paused { .. } => self.status = ContractStatus::Paused,
            ContractEvent::Cancelled {
                notice_date,
                effective_end,
                ..
            } => {
                self.status = ContractStatus::Cancelled;
                self.cancelled_on = Some(*notice_date);
                if let Some(terms) = self.terms.as_mut() {
                    terms.end_date = Some(*effective_end);
                }
            }
            ContractEvent::Ended { .. } => self.status = ContractStatus::Ended,
            ContractEvent::PeriodBilled { period_index, .. } => {
                self.billed_periods = period_index + 1;
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ContractCommand::Create {
                tenant_id,
                contract_id,
                terms,
                occurred_at,
            } => {
                if self.terms.is_some() {
                    return Err(DomainError::conflict("contract already exists"));
                }
                Ok(vec![ContractEvent::Created {
                    tenant_id: *tenant_id,
                    contract_id: *contract_id,
                    terms: terms.validated()?,
                    occurred_at: *occurred_at,
                }])
            }
            ContractCommand::Revise {
                tenant_id,
                terms,
                occurred_at,
            } => {
                let current = self.ensure_tenant(*tenant_id)?;
                if self.status != ContractStatus::Draft {
                    return Err(self.transition_error("revise"));
                }
                let terms = terms.validated()?;
                if &terms == current {
                    return Ok(vec![]);
                }
                Ok(vec![ContractEvent::Revised {
                    terms,
                    occurred_at: *occurred_at,
                }])
            }
            ContractCommand::Activate {
                tenant_id,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status != ContractStatus::Draft {
                    return Err(self.transition_error("activate"));
                }
                Ok(vec![ContractEvent::Activated {
                    occurred_at: *occurred_at,
                }])
            }
            ContractCommand::Pause {
                tenant_id,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status != ContractStatus::Active {
                    return Err(self.transition_error("pause"));
                }
                Ok(vec![ContractEvent::Paused {
                    occurred_at: *occurred_at,
                }])
            }
            ContractCommand::Resume {
                tenant_id,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status != ContractStatus::Paused {
                    return Err(self.transition_error("resume"));
                }
                Ok(vec![ContractEvent::Resumed {
                    occurred_at: *occurred_at,
                }])
            }
            ContractCommand::Cancel {
                tenant_id,
                notice_date,
                effective_end,
                occurred_at,
            } => {
                let terms = self.ensure_tenant(*tenant_id)?;
                if !matches!(self.status, ContractStatus::Active | ContractStatus::Paused) {
                    return Err(self.transition_error("cancel"));
                }
                let earliest = add_months(*notice_date, terms.notice_period_months);
                if *effective_end < earliest {
                    return Err(DomainError::validation(format!(
                        "notice period of {} months: earliest end is {earliest}",
                        terms.notice_period_months
                    )));
                }
                if *effective_end < terms.start_date {
                    return Err(DomainError::validation("end date lies before start date"));
                }
                Ok(vec![ContractEvent::Cancelled {
                    notice_date: *notice_date,
                    effective_end: *effective_end,
                    occurred_at: *occurred_at,
                }])
            }
            ContractCommand::End {
                tenant_id,
                on,
                occurred_at,
            } => {
                let terms = self.ensure_tenant(*tenant_id)?;
                if self.status != ContractStatus::Cancelled {
                    return Err(self.transition_error("end"));
                }
                if let Some(end) = terms.end_date {
                    if *on < end {
                        return Err(DomainError::invariant(format!("contract runs until {end}")));
                    }
                }
                Ok(vec![ContractEvent::Ended {
                    on: *on,
                    occurred_at: *occurred_at,
                }])
            }
            ContractCommand::MarkPeriodBilled {
                tenant_id,
                period_index,
                invoice_id,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if !self.bills() {
                    return Err(self.transition_error("bill"));
                }
                if *period_index != self.billed_periods {
                    return Err(DomainError::conflict(format!(
                        "period {period_index} is not the next due period ({})",
                        self.billed_periods
                    )));
                }
                if self.next_billing_date().is_none() {
                    return Err(DomainError::invariant("contract has no periods left to bill"));
                }
                Ok(vec![ContractEvent::PeriodBilled {
                    period_index: *period_index,
                    invoice_id: *invoice_id,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl Auditable for Contract {
    const ENTITY_TYPE: &'static str = "contract";

    fn audit_snapshot(&self) -> Option<JsonValue> {
        let t = self.terms.as_ref()?;
        Some(json!({
            "customer_id": t.customer_id,
            "title": t.title,
            "items": t.items,
            "interval": t.interval,
            "start_date": t.start_date,
            "end_date": t.end_date,
            "notice_period_months": t.notice_period_months,
            "payment_terms_days": t.payment_terms_days,
            "status": self.status,
            "next_billing_date": self.next_billing_date(),
            "cancelled_on": self.cancelled_on,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn item(cents: i64, billing_type: BillingType) -> ContractItem {
        ContractItem {
            product_id: None,
            description: "Support".into(),
            quantity: Quantity::ONE,
            unit_price: Money::eur(cents),
            tax_rate_bp: 1_900,
            billing_type,
        }
    }

    fn terms() -> ContractTerms {
        ContractTerms {
            customer_id: CustomerId::generate(),
            title: "Maintenance".into(),
            items: vec![item(10_000, BillingType::Recurring), item(50_000, BillingType::OneTime)],
            interval: BillingInterval::Monthly,
            start_date: d(2024, 1, 31),
            end_date: None,
            notice_period_months: 3,
            payment_terms_days: 14,
        }
    }

    fn run(c: &mut Contract, cmd: ContractCommand) {
        for e in c.handle(&cmd).unwrap() {
            c.apply(&e);
        }
    }

    fn active(tenant_id: TenantId) -> Contract {
        let id = ContractId::generate();
        let mut c = Contract::empty(id);
        run(&mut c, ContractCommand::Create { tenant_id, contract_id: id, terms: terms(), occurred_at: Utc::now() });
        run(&mut c, ContractCommand::Activate { tenant_id, occurred_at: Utc::now() });
        c
    }

    #[test]
    fn create_requires_items() {
        let c = Contract::empty(ContractId::generate());
        let mut t = terms();
        t.items.clear();
        let err = c
            .handle(&ContractCommand::Create {
                tenant_id: TenantId::new(),
                contract_id: ContractId::generate(),
                terms: t,
                occurred_at: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn drafts_bill_nothing_and_active_contracts_list_due_periods() {
        let tenant_id = TenantId::new();
        let id = ContractId::generate();
        let mut c = Contract::empty(id);
        run(&mut c, ContractCommand::Create { tenant_id, contract_id: id, terms: terms(), occurred_at: Utc::now() });
        assert!(c.due_periods(d(2024, 12, 31)).is_empty());

        let c = active(tenant_id);
        let due = c.due_periods(d(2024, 3, 31));
        let starts: Vec<_> = due.iter().map(|p| p.start).collect();
        assert_eq!(starts, vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 31)]);
        assert_eq!(due[0].end, d(2024, 2, 28));
    }

    #[test]
    fn one_time_items_bill_only_in_first_period() {
        let c = active(TenantId::new());
        let first = c.period_totals(0).unwrap();
        let second = c.period_totals(1).unwrap();
        assert_eq!(first.net, Money::eur(60_000));
        assert_eq!(second.net, Money::eur(10_000));
        assert_eq!(second.gross, Money::eur(11_900));
    }

    #[test]
    fn billing_advances_next_date_in_order() {
        let tenant_id = TenantId::new();
        let mut c = active(tenant_id);
        assert_eq!(c.next_billing_date(), Some(d(2024, 1, 31)));

        let out_of_order = ContractCommand::MarkPeriodBilled {
            tenant_id,
            period_index: 1,
            invoice_id: Some(AggregateId::new()),
            occurred_at: Utc::now(),
        };
        assert!(matches!(c.handle(&out_of_order), Err(DomainError::Conflict(_))));

        run(&mut c, ContractCommand::MarkPeriodBilled {
            tenant_id,
            period_index: 0,
            invoice_id: Some(AggregateId::new()),
            occurred_at: Utc::now(),
        });
        assert_eq!(c.next_billing_date(), Some(d(2024, 2, 29)));
        assert_eq!(c.due_periods(d(2024, 2, 29)).len(), 1);
    }

    #[test]
    fn pause_stops_billing_until_resumed() {
        let tenant_id = TenantId::new();
        let mut c = active(tenant_id);
        run(&mut c, ContractCommand::Pause { tenant_id, occurred_at: Utc::now() });
        assert!(c.due_periods(d(2025, 1, 1)).is_empty());
        assert!(c.handle(&ContractCommand::Pause { tenant_id, occurred_at: Utc::now() }).is_err());
        run(&mut c, ContractCommand::Resume { tenant_id, occurred_at: Utc::now() });
        assert_eq!(c.status(), ContractStatus::Active);
    }

    #[test]
    fn cancellation_respects_notice_period() {
        let tenant_id = TenantId::new();
        let mut c = active(tenant_id);
        let too_early = ContractCommand::Cancel {
            tenant_id,
            notice_date: d(2024, 5, 10),
            effective_end: d(2024, 7, 31),
            occurred_at: Utc::now(),
        };
        assert!(matches!(c.handle(&too_early), Err(DomainError::Validation(_))));

        run(&mut c, ContractCommand::Cancel {
            tenant_id,
            notice_date: d(2024, 5, 10),
            effective_end: d(2024, 8, 31),
            occurred_at: Utc::now(),
        });
        assert_eq!(c.status(), ContractStatus::Cancelled);
        assert_eq!(c.terms().unwrap().end_date, Some(d(2024, 8, 31)));

        // Cancelled contracts still bill up to the end date.
        let due = c.due_periods(d(2030, 1, 1));
        assert_eq!(due.last().unwrap().start, d(2024, 7, 31));
        assert_eq!(due.last().unwrap().end, d(2024, 8, 30));

        let early_end = ContractCommand::End { tenant_id, on: d(2024, 8, 1), occurred_at: Utc::now() };
        assert!(c.handle(&early_end).is_err());
        run(&mut c, ContractCommand::End { tenant_id, on: d(2024, 8, 31), occurred_at: Utc::now() });
        assert_eq!(c.status(), ContractStatus::Ended);
        assert_eq!(c.next_billing_date(), None);
    }

    #[test]
    fn only_drafts_can_be_revised() {
        let tenant_id = TenantId::new();
        let c = active(tenant_id);
        let mut t = terms();
        t.title = "Other".into();
        let err = c
            .handle(&ContractCommand::Revise { tenant_id, terms: t, occurred_at: Utc::now() })
            .unwrap_err();
        assert!(err.to_string().contains("cannot revise"));
    }
}
