use async_graphql::{ID, Object, SimpleObject};
use chrono::{DateTime, NaiveDate, Utc};

use kontor_banking::{
    BankAccount as DomainAccount, BankTransaction as DomainTransaction, ForecastPoint as DomainPoint,
    LiquidityForecast as DomainForecast, PlannedCashflow as DomainCashflow, RecurringPattern as DomainPattern,
};
use kontor_core::{AggregateRoot, Money as DomainMoney};

use crate::app::services::StatementImport;
use crate::graphql::types::Money;
use crate::graphql::types::enums::{CashflowSource, Direction, Frequency, PatternStatus};

#[derive(Clone)]
pub struct BankAccount {
    pub inner: DomainAccount,
}

impl From<DomainAccount> for BankAccount {
    fn from(account: DomainAccount) -> Self {
        Self { inner: account }
    }
}

#[Object]
impl BankAccount {
    async fn id(&self) -> ID {
        ID(self.inner.id().to_string())
    }

    async fn name(&self) -> Option<&str> {
        self.inner.details().map(|d| d.name.as_str())
    }

    async fn iban(&self) -> Option<&str> {
        self.inner.details().map(|d| d.iban.as_str())
    }

    async fn bic(&self) -> Option<&str> {
        self.inner.details().and_then(|d| d.bic.as_deref())
    }

    async fn currency(&self) -> String {
        self.inner.currency().as_str().to_string()
    }

    /// From the newest closing balance imported.
    async fn balance(&self) -> Money {
        self.inner.balance().into()
    }

    async fn balance_date(&self) -> Option<NaiveDate> {
        self.inner.balance_date()
    }
}

#[derive(Clone)]
pub struct BankTransaction {
    pub inner: DomainTransaction,
}

impl From<DomainTransaction> for BankTransaction {
    fn from(tx: DomainTransaction) -> Self {
        Self { inner: tx }
    }
}

#[Object]
impl BankTransaction {
    async fn id(&self) -> ID {
        ID(self.inner.id.to_string())
    }

    async fn booking_date(&self) -> NaiveDate {
        self.inner.booking_date
    }

    async fn value_date(&self) -> NaiveDate {
        self.inner.value_date
    }

    /// Signed: incoming positive, outgoing negative.
    async fn amount(&self) -> Money {
        self.inner.amount.into()
    }

    async fn purpose(&self) -> &str {
        &self.inner.purpose
    }

    async fn counterparty_name(&self) -> Option<&str> {
        self.inner.counterparty_name.as_deref()
    }

    async fn counterparty_iban(&self) -> Option<&str> {
        self.inner.counterparty_iban.as_deref()
    }

    async fn counterparty_bic(&self) -> Option<&str> {
        self.inner.counterparty_bic.as_deref()
    }

    async fn booking_text(&self) -> Option<&str> {
        self.inner.booking_text.as_deref()
    }

    async fn customer_reference(&self) -> Option<&str> {
        self.inner.customer_reference.as_deref()
    }

    async fn bank_reference(&self) -> Option<&str> {
        self.inner.bank_reference.as_deref()
    }

    async fn import_batch(&self) -> ID {
        ID(self.inner.import_batch.to_string())
    }

    async fn imported_at(&self) -> DateTime<Utc> {
        self.inner.imported_at
    }
}

#[derive(Clone)]
pub struct RecurringPattern {
    pub inner: DomainPattern,
}

impl From<DomainPattern> for RecurringPattern {
    fn from(pattern: DomainPattern) -> Self {
        Self { inner: pattern }
    }
}

#[Object]
impl RecurringPattern {
    async fn id(&self) -> ID {
        ID(self.inner.id.to_string())
    }

    async fn account_id(&self) -> ID {
        ID(self.inner.account_id.to_string())
    }

    /// Normalized IBAN, else normalized name.
    async fn counterparty_key(&self) -> &str {
        &self.inner.counterparty_key
    }

    async fn counterparty_name(&self) -> Option<&str> {
        self.inner.counterparty_name.as_deref()
    }

    async fn counterparty_iban(&self) -> Option<&str> {
        self.inner.counterparty_iban.as_deref()
    }

    async fn direction(&self) -> Direction {
        self.inner.direction.into()
    }

    async fn frequency(&self) -> Frequency {
        self.inner.frequency.into()
    }

    async fn average_amount(&self) -> Money {
        self.inner.average_amount.into()
    }

    /// Some amounts fall outside ±10 % of the median.
    async fn amount_varies(&self) -> bool {
        self.inner.amount_varies
    }

    async fn occurrences(&self) -> u32 {
        self.inner.occurrences
    }

    async fn last_date(&self) -> NaiveDate {
        self.inner.last_date
    }

    async fn next_expected(&self) -> NaiveDate {
        self.inner.next_expected
    }

    async fn confidence(&self) -> f64 {
        self.inner.confidence
    }

    async fn status(&self) -> PatternStatus {
        self.inner.status.into()
    }
}

#[derive(SimpleObject)]
pub struct StatementMismatch {
    pub reference: String,
    /// Closing minus computed balance, in cents.
    pub difference: i64,
}

/// Outcome of one MT940 upload.
#[derive(SimpleObject)]
pub struct StatementImportResult {
    pub batch_id: ID,
    pub imported: u64,
    pub duplicates: u64,
    pub statements: u64,
    pub mismatched_statements: Vec<StatementMismatch>,
    pub closing_balance: Option<Money>,
    pub closing_date: Option<NaiveDate>,
    /// Patterns known for the account after re-detection.
    pub patterns: u64,
    pub account: BankAccount,
}

impl From<StatementImport> for StatementImportResult {
    fn from(result: StatementImport) -> Self {
        let summary = result.summary;
        Self {
            batch_id: ID(summary.batch_id.to_string()),
            imported: summary.imported as u64,
            duplicates: summary.duplicates as u64,
            statements: summary.statements as u64,
            mismatched_statements: summary
                .mismatched_statements
                .into_iter()
                .map(|m| StatementMismatch {
                    reference: m.reference,
                    difference: m.difference,
                })
                .collect(),
            closing_balance: summary
                .closing_balance
                .map(|b| DomainMoney::new(b.amount, b.currency).into()),
            closing_date: summary.closing_balance.map(|b| b.date),
            patterns: result.patterns as u64,
            account: result.account.into(),
        }
    }
}

#[derive(SimpleObject)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub inflow: Money,
    pub outflow: Money,
    /// End-of-day balance.
    pub balance: Money,
}

impl From<DomainPoint> for ForecastPoint {
    fn from(p: DomainPoint) -> Self {
        Self {
            date: p.date,
            inflow: p.inflow.into(),
            outflow: p.outflow.into(),
            balance: p.balance.into(),
        }
    }
}

#[derive(SimpleObject)]
pub struct PlannedCashflow {
    pub date: NaiveDate,
    pub amount: Money,
    pub source: CashflowSource,
    pub label: String,
}

impl From<DomainCashflow> for PlannedCashflow {
    fn from(c: DomainCashflow) -> Self {
        Self {
            date: c.date,
            amount: c.amount.into(),
            source: c.source.into(),
            label: c.label,
        }
    }
}

#[derive(SimpleObject)]
pub struct LiquidityForecast {
    pub start_date: NaiveDate,
    pub start_balance: Money,
    pub points: Vec<ForecastPoint>,
    pub lowest_balance: Money,
    pub lowest_date: NaiveDate,
    pub end_balance: Money,
    pub events: Vec<PlannedCashflow>,
}

impl From<DomainForecast> for LiquidityForecast {
    fn from(f: DomainForecast) -> Self {
        Self {
            start_date: f.start_date,
            start_balance: f.start_balance.into(),
            points: f.points.into_iter().map(Into::into).collect(),
            lowest_balance: f.lowest_balance.into(),
            lowest_date: f.lowest_date,
            end_balance: f.end_balance.into(),
            events: f.events.into_iter().map(Into::into).collect(),
        }
    }
}
