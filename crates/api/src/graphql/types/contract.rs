use async_graphql::{Context, ID, Object, SimpleObject};
use chrono::NaiveDate;

use kontor_contracts::{BillingPeriod as DomainPeriod, Contract as DomainContract, ContractItem as DomainItem, PeriodTotals};
use kontor_core::AggregateRoot;

use crate::graphql::types::enums::{BillingInterval, BillingType, ContractStatus};
use crate::graphql::types::{Customer, Money};
use crate::graphql::{GqlResultExt, services, session};

#[derive(Clone)]
pub struct Contract {
    pub inner: DomainContract,
}

impl From<DomainContract> for Contract {
    fn from(contract: DomainContract) -> Self {
        Self { inner: contract }
    }
}

#[Object]
impl Contract {
    async fn id(&self) -> ID {
        ID(self.inner.id().to_string())
    }

    async fn customer_id(&self) -> Option<ID> {
        self.inner.terms().map(|t| ID(t.customer_id.to_string()))
    }

    async fn customer(&self, ctx: &Context<'_>) -> async_graphql::Result<Option<Customer>> {
        let Some(terms) = self.inner.terms() else {
            return Ok(None);
        };
        let customer = services(ctx)?.customer(session(ctx)?, terms.customer_id).gql()?;
        Ok(Some(customer.into()))
    }

    async fn title(&self) -> Option<&str> {
        self.inner.terms().map(|t| t.title.as_str())
    }

    async fn items(&self) -> Vec<ContractItem> {
        self.inner
            .terms()
            .map(|t| t.items.iter().map(ContractItem::from).collect())
            .unwrap_or_default()
    }

    async fn interval(&self) -> Option<BillingInterval> {
        self.inner.terms().map(|t| t.interval.into())
    }

    async fn start_date(&self) -> Option<NaiveDate> {
        self.inner.terms().map(|t| t.start_date)
    }

    async fn end_date(&self) -> Option<NaiveDate> {
        self.inner.terms().and_then(|t| t.end_date)
    }

    async fn notice_period_months(&self) -> Option<u32> {
        self.inner.terms().map(|t| t.notice_period_months)
    }

    async fn payment_terms_days(&self) -> Option<u32> {
        self.inner.terms().map(|t| t.payment_terms_days)
    }

    async fn status(&self) -> ContractStatus {
        self.inner.status().into()
    }

    async fn cancelled_on(&self) -> Option<NaiveDate> {
        self.inner.cancelled_on()
    }

    /// Periods invoiced so far.
    async fn billed_periods(&self) -> u32 {
        self.inner.billed_periods()
    }

    /// Start of the next period to invoice; `null` once the schedule is exhausted.
    async fn next_billing_date(&self) -> Option<NaiveDate> {
        self.inner.next_billing_date()
    }

    /// The next period to invoice and what it would amount to.
    async fn next_period(&self) -> Option<BillingPeriod> {
        self.inner.next_billing_date()?;
        let index = self.inner.billed_periods();
        let period = self.inner.period(index)?;
        let totals = self.inner.period_totals(index).ok();
        Some(BillingPeriod::new(period, totals))
    }
}

#[derive(SimpleObject)]
pub struct ContractItem {
    pub product_id: Option<ID>,
    pub description: String,
    /// Decimal string, up to three fraction digits.
    pub quantity: String,
    pub unit_price: Money,
    pub tax_rate_bp: u32,
    pub billing_type: BillingType,
}

impl From<&DomainItem> for ContractItem {
    fn from(item: &DomainItem) -> Self {
        Self {
            product_id: item.product_id.map(|id| ID(id.to_string())),
            description: item.description.clone(),
            quantity: item.quantity.to_string(),
            unit_price: item.unit_price.into(),
            tax_rate_bp: item.tax_rate_bp,
            billing_type: item.billing_type.into(),
        }
    }
}

#[derive(SimpleObject)]
pub struct BillingPeriod {
    pub index: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub net: Option<Money>,
    pub tax: Option<Money>,
    pub gross: Option<Money>,
}

impl BillingPeriod {
    pub fn new(period: DomainPeriod, totals: Option<PeriodTotals>) -> Self {
        Self {
            index: period.index,
            start: period.start,
            end: period.end,
            net: totals.map(|t| t.net.into()),
            tax: totals.map(|t| t.tax.into()),
            gross: totals.map(|t| t.gross.into()),
        }
    }
}
