//! Bank transactions and statement import with deduplication.
//!
//! Every imported line gets an import hash over its identifying fields. Identical rows
//! within one file (two equal card payments on the same day) are told apart by their
//! occurrence index, so re-importing an overlapping file skips exactly the rows already
//! stored.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use kontor_core::{Currency, DomainError, Money, TenantId, normalize_iban};

use crate::account::BankAccountId;
use crate::mt940::{Balance, Statement, StatementLine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub account_id: BankAccountId,
    pub booking_date: NaiveDate,
    pub value_date: NaiveDate,
    /// Signed: incoming positive, outgoing negative.
    pub amount: Money,
    pub purpose: String,
    pub counterparty_name: Option<String>,
    pub counterparty_iban: Option<String>,
    pub counterparty_bic: Option<String>,
    pub booking_text: Option<String>,
    pub customer_reference: Option<String>,
    pub bank_reference: Option<String>,
    pub import_hash: String,
    pub import_batch: Uuid,
    pub imported_at: DateTime<Utc>,
}

impl BankTransaction {
    /// Grouping key for recurring-pattern detection: IBAN, else normalized name.
    pub fn counterparty_key(&self) -> Option<String> {
        if let Some(iban) = self.counterparty_iban.as_deref().map(normalize_iban).filter(|i| !i.is_empty()) {
            return Some(iban);
        }
        self.counterparty_name
            .as_deref()
            .map(normalize_text)
            .filter(|n| !n.is_empty())
    }
}

/// Lowercase and collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn identity(account_id: BankAccountId, currency: Currency, line: &StatementLine) -> String {
    let iban = line
        .details
        .counterparty_account
        .as_deref()
        .map(normalize_iban)
        .unwrap_or_default();
    let purpose = line.details.purpose.as_deref().map(normalize_text).unwrap_or_default();
    [
        account_id.to_string(),
        line.booking_date().to_string(),
        line.value_date.to_string(),
        line.amount.to_string(),
        currency.to_string(),
        purpose,
        iban,
        line.customer_reference.clone().unwrap_or_default(),
    ]
    .join("|")
}

/// SHA-256 (hex) of a line's identity and its occurrence among identical rows.
pub fn import_hash(account_id: BankAccountId, currency: Currency, line: &StatementLine, occurrence: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity(account_id, currency, line).as_bytes());
    hasher.update(b"|");
    hasher.update(occurrence.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementMismatch {
    pub reference: String,
    /// Closing minus computed balance, in cents.
    pub difference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: Uuid,
    pub imported: usize,
    pub duplicates: usize,
    pub statements: usize,
    pub mismatched_statements: Vec<StatementMismatch>,
    /// Newest closing balance in the file.
    pub closing_balance: Option<Balance>,
}

/// Transactions to store plus the summary to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImport {
    pub transactions: Vec<BankTransaction>,
    pub summary: ImportSummary,
}

pub struct ImportContext<'a> {
    pub tenant_id: TenantId,
    pub account_id: BankAccountId,
    pub currency: Currency,
    /// Hashes already stored for the account.
    pub existing_hashes: &'a HashSet<String>,
    pub batch_id: Uuid,
    pub now: DateTime<Utc>,
}

/// Turn parsed statements into new transactions, skipping rows already imported.
pub fn prepare_import(ctx: &ImportContext<'_>, statements: &[Statement]) -> Result<PreparedImport, DomainError> {
    let mut occurrences: HashMap<String, u32> = HashMap::new();
    let mut transactions = Vec::new();
    let mut duplicates = 0;
    let mut mismatched = Vec::new();
    let mut closing: Option<Balance> = None;

    for stmt in statements {
        if let Some(currency) = stmt.currency() {
            if currency != ctx.currency {
                return Err(DomainError::validation(format!(
                    "statement '{}' is in {currency}, the account is in {}",
                    stmt.reference, ctx.currency
                )));
            }
        }
        if let Some(difference) = stmt.balance_mismatch() {
            mismatched.push(StatementMismatch {
                reference: stmt.reference.clone(),
                difference,
            });
        }
        if let Some(c) = stmt.closing {
            if closing.is_none_or(|prev| c.date >= prev.date) {
                closing = Some(c);
            }
        }

        for line in &stmt.lines {
            let counter = occurrences
                .entry(identity(ctx.account_id, ctx.currency, line))
                .or_insert(0);
            let occurrence = *counter;
            *counter += 1;

            let hash = import_hash(ctx.account_id, ctx.currency, line, occurrence);
            if ctx.existing_hashes.contains(&hash) {
                duplicates += 1;
                continue;
            }

            let d = &line.details;
            transactions.push(BankTransaction {
                id: Uuid::now_v7(),
                tenant_id: ctx.tenant_id,
                account_id: ctx.account_id,
                booking_date: line.booking_date(),
                value_date: line.value_date,
                amount: Money::new(line.amount, ctx.currency),
                purpose: d.purpose.clone().unwrap_or_default(),
                counterparty_name: d.counterparty_name.clone(),
                counterparty_iban: d.counterparty_account.as_deref().map(normalize_iban),
                counterparty_bic: d.counterparty_bic.clone(),
                booking_text: d.booking_text.clone(),
                customer_reference: line.customer_reference.clone(),
                bank_reference: line.bank_reference.clone(),
                import_hash: hash,
                import_batch: ctx.batch_id,
                imported_at: ctx.now,
            });
        }
    }

    let summary = ImportSummary {
        batch_id: ctx.batch_id,
        imported: transactions.len(),
        duplicates,
        statements: statements.len(),
        mismatched_statements: mismatched,
        closing_balance: closing,
    };
    Ok(PreparedImport { transactions, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mt940;

    const FILE: &str = "\
:20:A
:25:DE02120300000000202051
:60F:C240301EUR100,00
:61:240305D9,99NMSCNONREF
:86:Kartenzahlung Baeckerei
:61:240305D9,99NMSCNONREF
:86:Kartenzahlung Baeckerei
:61:240306C50,00NTRFNONREF
:86:166?00GUTSCHRIFT?20Miete Maerz?31DE02 1203 0000 0000 2020 51?32Max Mustermann
:62F:C240306EUR130,02
-
";

    fn ctx(existing: &HashSet<String>) -> ImportContext<'_> {
        ImportContext {
            tenant_id: TenantId::new(),
            account_id: BankAccountId::new(kontor_core::AggregateId::from_uuid(Uuid::nil())),
            currency: Currency::EUR,
            existing_hashes: existing,
            batch_id: Uuid::now_v7(),
            now: Utc::now(),
        }
    }

    #[test]
    fn identical_rows_in_one_file_are_both_imported() {
        let stmts = mt940::parse(FILE).unwrap();
        let none = HashSet::new();
        let prepared = prepare_import(&ctx(&none), &stmts).unwrap();
        assert_eq!(prepared.summary.imported, 3);
        assert_eq!(prepared.summary.duplicates, 0);
        let hashes: HashSet<_> = prepared.transactions.iter().map(|t| t.import_hash.clone()).collect();
        assert_eq!(hashes.len(), 3);
        assert_eq!(prepared.summary.closing_balance.unwrap().amount, 13_002);
        assert!(prepared.summary.mismatched_statements.is_empty());

        let rent = &prepared.transactions[2];
        assert_eq!(rent.counterparty_iban.as_deref(), Some("DE02120300000000202051"));
        assert_eq!(rent.amount, Money::eur(5_000));
    }

    #[test]
    fn reimport_skips_everything_already_stored() {
        let stmts = mt940::parse(FILE).unwrap();
        let none = HashSet::new();
        let first = prepare_import(&ctx(&none), &stmts).unwrap();
        let stored: HashSet<String> = first.transactions.iter().map(|t| t.import_hash.clone()).collect();

        let again = prepare_import(&ctx(&stored), &stmts).unwrap();
        assert_eq!(again.summary.imported, 0);
        assert_eq!(again.summary.duplicates, 3);
    }

    #[test]
    fn a_third_identical_row_in_a_later_file_is_new() {
        let first = prepare_import(&ctx(&HashSet::new()), &mt940::parse(FILE).unwrap()).unwrap();
        let stored: HashSet<String> = first.transactions.iter().map(|t| t.import_hash.clone()).collect();

        let extended = FILE.replace(
            ":61:240306C50,00",
            ":61:240305D9,99NMSCNONREF\n:86:Kartenzahlung Baeckerei\n:61:240306C50,00",
        );
        let again = prepare_import(&ctx(&stored), &mt940::parse(&extended).unwrap()).unwrap();
        assert_eq!(again.summary.imported, 1);
        assert_eq!(again.summary.duplicates, 3);
        assert_eq!(again.summary.mismatched_statements.len(), 1);
    }

    #[test]
    fn currency_mismatch_is_rejected() {
        let usd = FILE.replace("EUR", "USD");
        let none = HashSet::new();
        assert!(prepare_import(&ctx(&none), &mt940::parse(&usd).unwrap()).is_err());
    }

    #[test]
    fn counterparty_key_prefers_iban() {
        let stmts = mt940::parse(FILE).unwrap();
        let none = HashSet::new();
        let prepared = prepare_import(&ctx(&none), &stmts).unwrap();
        assert_eq!(prepared.transactions[2].counterparty_key().as_deref(), Some("DE02120300000000202051"));
        assert_eq!(prepared.transactions[0].counterparty_key(), None);
    }
}
