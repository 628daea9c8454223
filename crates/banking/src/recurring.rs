//! Detection of recurring payments (rent, salaries, subscriptions) in an account's history.

use std::collections::BTreeMap;

use chrono::{Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kontor_core::{Currency, Money, TenantId};

use crate::account::BankAccountId;
use crate::transaction::BankTransaction;

pub const DEFAULT_MIN_OCCURRENCES: usize = 3;
const MIN_INTERVAL_FIT: f64 = 0.75;
const AMOUNT_TOLERANCE: f64 = 0.10;
const MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Weekly,
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
}

impl Frequency {
    const ALL: [Frequency; 5] = [
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Quarterly,
        Frequency::HalfYearly,
        Frequency::Yearly,
    ];

    /// Typical interval and accepted deviation, in days.
    fn window(&self) -> (f64, f64) {
        match self {
            Frequency::Weekly => (7.0, 2.0),
            Frequency::Monthly => (30.0, 5.0),
            Frequency::Quarterly => (91.0, 10.0),
            Frequency::HalfYearly => (182.0, 15.0),
            Frequency::Yearly => (365.0, 20.0),
        }
    }

    pub fn fits(&self, days: f64) -> bool {
        let (center, tolerance) = self.window();
        (days - center).abs() <= tolerance
    }

    pub fn classify(median_days: f64) -> Option<Frequency> {
        Self::ALL.into_iter().find(|f| f.fits(median_days))
    }

    /// Next occurrence after `date`; calendar months for monthly and longer.
    pub fn step(&self, date: NaiveDate) -> NaiveDate {
        self.nth_after(date, 1)
    }

    /// The `n`-th occurrence counted from `anchor`. Month steps are taken from the
    /// anchor, so a day clamped to a short month does not carry over to later ones.
    pub fn nth_after(&self, anchor: NaiveDate, n: u32) -> NaiveDate {
        let months: u32 = match self {
            Frequency::Weekly => {
                return anchor
                    .checked_add_signed(Duration::days(7 * i64::from(n)))
                    .unwrap_or(NaiveDate::MAX);
            }
            Frequency::Monthly => 1,
            Frequency::Quarterly => 3,
            Frequency::HalfYearly => 6,
            Frequency::Yearly => 12,
        };
        months
            .checked_mul(n)
            .and_then(|m| anchor.checked_add_months(Months::new(m)))
            .unwrap_or(NaiveDate::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PatternStatus {
    #[default]
    Suggested,
    Confirmed,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringPattern {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub account_id: BankAccountId,
    pub counterparty_key: String,
    pub direction: Direction,
    pub counterparty_name: Option<String>,
    pub counterparty_iban: Option<String>,
    pub frequency: Frequency,
    /// Mean of the signed amounts.
    pub average_amount: Money,
    /// Not every amount is within ±10 % of the median.
    pub amount_varies: bool,
    pub occurrences: u32,
    pub last_date: NaiveDate,
    pub next_expected: NaiveDate,
    pub confidence: f64,
    pub status: PatternStatus,
}

impl RecurringPattern {
    fn identity(&self) -> (&str, Direction) {
        (&self.counterparty_key, self.direction)
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn analyze(
    tenant_id: TenantId,
    account_id: BankAccountId,
    key: &str,
    direction: Direction,
    mut txs: Vec<&BankTransaction>,
) -> Option<RecurringPattern> {
    txs.sort_by_key(|t| t.booking_date);

    let intervals: Vec<f64> = txs
        .windows(2)
        .map(|w| (w[1].booking_date - w[0].booking_date).num_days() as f64)
        .collect();
    let mut sorted = intervals.clone();
    sorted.sort_by(f64::total_cmp);
    let frequency = Frequency::classify(median(&sorted))?;

    let fit = intervals.iter().filter(|d| frequency.fits(**d)).count() as f64 / intervals.len() as f64;
    if fit < MIN_INTERVAL_FIT {
        return None;
    }

    let mut amounts: Vec<f64> = txs.iter().map(|t| t.amount.cents.abs() as f64).collect();
    amounts.sort_by(f64::total_cmp);
    let median_amount = median(&amounts);
    let consistent = amounts
        .iter()
        .filter(|a| (**a - median_amount).abs() <= median_amount * AMOUNT_TOLERANCE)
        .count();
    let consistency = consistent as f64 / amounts.len() as f64;

    let confidence = round2(fit * consistency);
    if confidence < MIN_CONFIDENCE {
        return None;
    }

    let currency: Currency = txs[0].amount.currency;
    let sum: i64 = txs.iter().map(|t| t.amount.cents).sum();
    let average = (sum as f64 / txs.len() as f64).round() as i64;
    let last = txs[txs.len() - 1];

    Some(RecurringPattern {
        id: Uuid::now_v7(),
        tenant_id,
        account_id,
        counterparty_key: key.to_string(),
        direction,
        counterparty_name: txs.iter().rev().find_map(|t| t.counterparty_name.clone()),
        counterparty_iban: txs.iter().rev().find_map(|t| t.counterparty_iban.clone()),
        frequency,
        average_amount: Money::new(average, currency),
        amount_varies: consistent < amounts.len(),
        occurrences: txs.len() as u32,
        last_date: last.booking_date,
        next_expected: frequency.step(last.booking_date),
        confidence,
        status: PatternStatus::Suggested,
    })
}

/// Patterns in one account's transactions, most confident first.
pub fn detect_patterns(
    tenant_id: TenantId,
    account_id: BankAccountId,
    transactions: &[BankTransaction],
    min_occurrences: usize,
) -> Vec<RecurringPattern> {
    let mut groups: BTreeMap<(String, Direction), Vec<&BankTransaction>> = BTreeMap::new();
    for tx in transactions.iter().filter(|t| t.account_id == account_id) {
        let direction = match tx.amount.cents {
            c if c > 0 => Direction::Incoming,
            c if c < 0 => Direction::Outgoing,
            _ => continue,
        };
        let Some(key) = tx.counterparty_key() else {
            continue;
        };
        groups.entry((key, direction)).or_default().push(tx);
    }

    let mut patterns: Vec<RecurringPattern> = groups
        .into_iter()
        .filter(|(_, txs)| txs.len() >= min_occurrences.max(2))
        .filter_map(|((key, direction), txs)| analyze(tenant_id, account_id, &key, direction, txs))
        .collect();
    patterns.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.counterparty_key.cmp(&b.counterparty_key))
    });
    patterns
}

/// Replace suggestions with a fresh detection run.
///
/// Confirmed and ignored patterns keep their id and status; a re-detected one gets the
/// fresh statistics. Previous suggestions that were not detected again disappear.
pub fn merge_detected(existing: &[RecurringPattern], detected: Vec<RecurringPattern>) -> Vec<RecurringPattern> {
    let decided: Vec<&RecurringPattern> = existing
        .iter()
        .filter(|p| p.status != PatternStatus::Suggested)
        .collect();

    let mut out: Vec<RecurringPattern> = Vec::with_capacity(detected.len() + decided.len());
    for mut fresh in detected {
        if let Some(prev) = decided.iter().find(|p| p.identity() == fresh.identity()) {
            fresh.id = prev.id;
            fresh.status = prev.status;
        }
        out.push(fresh);
    }
    for prev in decided {
        if !out.iter().any(|p| p.identity() == prev.identity()) {
            out.push(prev.clone());
        }
    }
    out
}
