//! Calendar arithmetic for billing periods.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use kontor_core::{DomainError, Money, Quantity, basis_points_of};
use kontor_products::BillingType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
}

impl BillingInterval {
    pub fn months(&self) -> u32 {
        match self {
            BillingInterval::Monthly => 1,
            BillingInterval::Quarterly => 3,
            BillingInterval::HalfYearly => 6,
            BillingInterval::Yearly => 12,
        }
    }
}

/// `date + months`, clamped to the last day of the target month (Jan 31 + 1 = Feb 28/29).
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

/// One billing period, both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    /// 0 for the first period of the contract.
    pub index: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Start of period `index` for a schedule anchored at `anchor`.
///
/// Always computed from the anchor so clamping in short months does not drift.
pub fn period_start(anchor: NaiveDate, interval: BillingInterval, index: u32) -> NaiveDate {
    add_months(anchor, interval.months().saturating_mul(index))
}

pub fn period(anchor: NaiveDate, interval: BillingInterval, index: u32, end_date: Option<NaiveDate>) -> BillingPeriod {
    let start = period_start(anchor, interval, index);
    let next = period_start(anchor, interval, index.saturating_add(1));
    let mut end = next.pred_opt().unwrap_or(next);
    if let Some(limit) = end_date {
        end = end.min(limit);
    }
    BillingPeriod { index, start, end }
}

/// Net/tax/gross of one billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub net: Money,
    pub tax: Money,
    pub gross: Money,
}

/// Sum line nets and per-line rounded tax for the given `(quantity, unit price, tax bp)` lines.
pub fn totals<I>(lines: I, zero: Money) -> Result<PeriodTotals, DomainError>
where
    I: IntoIterator<Item = (Quantity, Money, u32)>,
{
    let overflow = || DomainError::invariant("amount overflow");
    let mut net = zero;
    let mut tax = zero;
    for (qty, price, rate) in lines {
        let line_net = qty.times_cents(price.cents).ok_or_else(overflow)?;
        let line_tax = basis_points_of(line_net, rate).ok_or_else(overflow)?;
        net = net.checked_add(Money::new(line_net, price.currency))?;
        tax = tax.checked_add(Money::new(line_tax, price.currency))?;
    }
    Ok(PeriodTotals {
        net,
        tax,
        gross: net.checked_add(tax)?,
    })
}

/// One-time items bill only in the first period, recurring items in every period.
pub fn bills_in_period(billing_type: BillingType, index: u32) -> bool {
    match billing_type {
        BillingType::OneTime => index == 0,
        BillingType::Recurring => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn month_arithmetic_clamps_to_month_end() {
        assert_eq!(add_months(d(2024, 1, 31), 1), d(2024, 2, 29));
        assert_eq!(add_months(d(2023, 1, 31), 1), d(2023, 2, 28));
        assert_eq!(add_months(d(2024, 8, 31), 3), d(2024, 11, 30));
        assert_eq!(add_months(d(2024, 2, 29), 12), d(2025, 2, 28));
    }

    #[test]
    fn periods_do_not_drift_after_short_months() {
        let anchor = d(2024, 1, 31);
        let starts: Vec<_> = (0..4)
            .map(|i| period_start(anchor, BillingInterval::Monthly, i))
            .collect();
        assert_eq!(starts, vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 31), d(2024, 4, 30)]);
    }

    #[test]
    fn period_end_is_day_before_next_start_and_respects_end_date() {
        let p = period(d(2024, 1, 1), BillingInterval::Quarterly, 1, None);
        assert_eq!((p.start, p.end), (d(2024, 4, 1), d(2024, 6, 30)));

        let p = period(d(2024, 1, 1), BillingInterval::Yearly, 0, Some(d(2024, 5, 15)));
        assert_eq!(p.end, d(2024, 5, 15));
    }

    #[test]
    fn totals_round_tax_per_line() {
        let lines = vec![
            (Quantity::units(1), Money::eur(1_005), 1_900),
            (Quantity::units(3), Money::eur(333), 700),
        ];
        let t = totals(lines, Money::eur(0)).unwrap();
        // 10.05 * 19 % = 1.9095 -> 1.91 ; 9.99 * 7 % = 0.6993 -> 0.70
        assert_eq!(t.net, Money::eur(2_004));
        assert_eq!(t.tax, Money::eur(261));
        assert_eq!(t.gross, Money::eur(2_265));
    }
}
