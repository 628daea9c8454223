//! Liquidity forecast: today's balance rolled forward with expected cash flows.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use kontor_core::{Currency, DomainError, Money};

use crate::recurring::{PatternStatus, RecurringPattern};

pub const DEFAULT_FORECAST_DAYS: u32 = 90;
pub const MAX_FORECAST_DAYS: u32 = 730;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashflowSource {
    RecurringPattern,
    OpenInvoice,
    ContractBilling,
}

/// A single expected cash flow, signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedCashflow {
    pub date: NaiveDate,
    pub amount: Money,
    pub source: CashflowSource,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub inflow: Money,
    /// Positive number.
    pub outflow: Money,
    /// Balance at the end of the day.
    pub balance: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityForecast {
    pub start_date: NaiveDate,
    pub start_balance: Money,
    pub points: Vec<ForecastPoint>,
    pub lowest_balance: Money,
    pub lowest_date: NaiveDate,
    pub end_balance: Money,
    pub events: Vec<PlannedCashflow>,
}

#[derive(Debug, Clone)]
pub struct ForecastInput<'a> {
    pub today: NaiveDate,
    pub days: u32,
    pub currency: Currency,
    pub start_balance: Money,
    pub patterns: &'a [RecurringPattern],
    pub include_suggested: bool,
    /// Open invoices (outstanding amount at the due date).
    pub receivables: Vec<PlannedCashflow>,
    /// Upcoming contract billings; empty when not requested.
    pub contract_billings: Vec<PlannedCashflow>,
}

/// Occurrences of `pattern` within `[today, end]`.
pub fn project_pattern(pattern: &RecurringPattern, today: NaiveDate, end: NaiveDate) -> Vec<PlannedCashflow> {
    let label = pattern
        .counterparty_name
        .clone()
        .unwrap_or_else(|| pattern.counterparty_key.clone());
    let anchor = pattern.next_expected;
    let mut out = Vec::new();
    let mut previous = None;
    for n in 0u32.. {
        let date = pattern.frequency.nth_after(anchor, n);
        if date > end || previous.is_some_and(|p| date <= p) {
            break;
        }
        previous = Some(date);
        if date >= today {
            out.push(PlannedCashflow {
                date,
                amount: pattern.average_amount,
                source: CashflowSource::RecurringPattern,
                label: label.clone(),
            });
        }
    }
    out
}

pub fn forecast(input: ForecastInput<'_>) -> Result<LiquidityForecast, DomainError> {
    if !(1..=MAX_FORECAST_DAYS).contains(&input.days) {
        return Err(DomainError::validation(format!(
            "forecast horizon must be between 1 and {MAX_FORECAST_DAYS} days"
        )));
    }
    let today = input.today;
    let end = today + Duration::days(i64::from(input.days) - 1);

    let mut events: Vec<PlannedCashflow> = input
        .patterns
        .iter()
        .filter(|p| match p.status {
            PatternStatus::Confirmed => true,
            PatternStatus::Suggested => input.include_suggested,
            PatternStatus::Ignored => false,
        })
        .flat_map(|p| project_pattern(p, today, end))
        .collect();

    // Overdue receivables are still expected; they count from today.
    events.extend(
        input
            .receivables
            .into_iter()
            .chain(input.contract_billings)
            .filter(|e| e.date <= end)
            .map(|mut e| {
                e.date = e.date.max(today);
                e
            }),
    );

    for e in &events {
        if e.amount.currency != input.currency {
            return Err(DomainError::validation(format!(
                "cash flow '{}' is in {}, the forecast is in {}",
                e.label, e.amount.currency, input.currency
            )));
        }
    }
    events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.label.cmp(&b.label)));

    let mut per_day: BTreeMap<NaiveDate, (i64, i64)> = BTreeMap::new();
    for e in &events {
        let slot = per_day.entry(e.date).or_default();
        if e.amount.cents >= 0 {
            slot.0 += e.amount.cents;
        } else {
            slot.1 += -e.amount.cents;
        }
    }

    let money = |cents| Money::new(cents, input.currency);
    let mut balance = input.start_balance.cents;
    let mut lowest = (balance, today);
    let mut points = Vec::with_capacity(input.days as usize);
    for offset in 0..i64::from(input.days) {
        let date = today + Duration::days(offset);
        let (inflow, outflow) = per_day.get(&date).copied().unwrap_or((0, 0));
        balance += inflow - outflow;
        if balance < lowest.0 {
            lowest = (balance, date);
        }
        points.push(ForecastPoint {
            date,
            inflow: money(inflow),
            outflow: money(outflow),
            balance: money(balance),
        });
    }

    Ok(LiquidityForecast {
        start_date: today,
        start_balance: input.start_balance,
        points,
        lowest_balance: money(lowest.0),
        lowest_date: lowest.1,
        end_balance: money(balance),
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::BankAccountId;
    use crate::recurring::{Direction, Frequency};
    use kontor_core::{AggregateId, TenantId};
    use uuid::Uuid;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn pattern(next: NaiveDate, cents: i64, status: PatternStatus) -> RecurringPattern {
        RecurringPattern {
            id: Uuid::now_v7(),
            tenant_id: TenantId::new(),
            account_id: BankAccountId::new(AggregateId::new()),
            counterparty_key: "rent".into(),
            direction: if cents < 0 { Direction::Outgoing } else { Direction::Incoming },
            counterparty_name: Some("Vermieter".into()),
            counterparty_iban: None,
            frequency: Frequency::Monthly,
            average_amount: Money::eur(cents),
            amount_varies: false,
            occurrences: 6,
            last_date: next - Duration::days(30),
            next_expected: next,
            confidence: 1.0,
            status,
        }
    }

    fn input(patterns: &[RecurringPattern]) -> ForecastInput<'_> {
        ForecastInput {
            today: d(2024, 3, 10),
            days: 90,
            currency: Currency::EUR,
            start_balance: Money::eur(100_000),
            patterns,
            include_suggested: false,
            receivables: vec![],
            contract_billings: vec![],
        }
    }

    #[test]
    fn projects_confirmed_patterns_and_skips_past_occurrences() {
        let patterns = [pattern(d(2024, 3, 1), -80_000, PatternStatus::Confirmed)];
        let f = forecast(input(&patterns)).unwrap();
        // 1 Mar is before today; Apr 1, May 1, Jun 1 fall into the horizon (ends Jun 7).
        assert_eq!(f.events.len(), 3);
        assert_eq!(f.points.len(), 90);
        assert_eq!(f.end_balance, Money::eur(100_000 - 3 * 80_000));
        assert_eq!(f.lowest_balance, f.end_balance);
        assert_eq!(f.lowest_date, d(2024, 6, 1));
    }

    #[test]
    fn suggested_patterns_are_optional_and_ignored_never_count() {
        let patterns = [
            pattern(d(2024, 3, 15), -1_000, PatternStatus::Suggested),
            pattern(d(2024, 3, 15), -2_000, PatternStatus::Ignored),
        ];
        assert!(forecast(input(&patterns)).unwrap().events.is_empty());
        let mut i = input(&patterns);
        i.include_suggested = true;
        assert_eq!(forecast(i).unwrap().events.len(), 3);
    }

    #[test]
    fn receivables_and_contract_billings_flow_in() {
        let mut i = input(&[]);
        i.receivables = vec![
            PlannedCashflow {
                date: d(2024, 2, 1),
                amount: Money::eur(5_000),
                source: CashflowSource::OpenInvoice,
                label: "RE-2024-0001".into(),
            },
            PlannedCashflow {
                date: d(2025, 1, 1),
                amount: Money::eur(7_000),
                source: CashflowSource::OpenInvoice,
                label: "RE-2024-0099".into(),
            },
        ];
        i.contract_billings = vec![PlannedCashflow {
            date: d(2024, 4, 1),
            amount: Money::eur(11_900),
            source: CashflowSource::ContractBilling,
            label: "Wartung".into(),
        }];
        let f = forecast(i).unwrap();
        assert_eq!(f.events.len(), 2);
        assert_eq!(f.points[0].inflow, Money::eur(5_000));
        assert_eq!(f.end_balance, Money::eur(116_900));
        assert_eq!(f.lowest_balance, Money::eur(100_000));
        assert_eq!(f.lowest_date, d(2024, 3, 10));
    }

    #[test]
    fn month_end_payments_keep_their_day() {
        let p = pattern(d(2024, 1, 31), -50_000, PatternStatus::Confirmed);
        let dates: Vec<_> = project_pattern(&p, d(2024, 1, 1), d(2024, 5, 31))
            .into_iter()
            .map(|e| e.date)
            .collect();
        assert_eq!(
            dates,
            vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 31), d(2024, 4, 30), d(2024, 5, 31)]
        );
    }

    #[test]
    fn horizon_is_bounded() {
        let mut i = input(&[]);
        i.days = 0;
        assert!(forecast(i.clone()).is_err());
        i.days = 731;
        assert!(forecast(i).is_err());
    }
}
