//! Bank transactions and recurring patterns.
//!
//! Transactions are append-only rows (not event-sourced); the import hash is unique per
//! account. Patterns are replaced per account on every detection run.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use uuid::Uuid;

use kontor_banking::{BankAccountId, BankTransaction, PatternStatus, RecurringPattern};
use kontor_core::TenantId;

use crate::error::StoreError;

type AccountKey = (TenantId, BankAccountId);

#[derive(Debug, Default)]
struct AccountRows {
    hashes: HashSet<String>,
    transactions: Vec<BankTransaction>,
}

#[derive(Debug, Default)]
pub struct InMemoryBankingStore {
    accounts: RwLock<HashMap<AccountKey, AccountRows>>,
    patterns: RwLock<HashMap<TenantId, Vec<RecurringPattern>>>,
}

impl InMemoryBankingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `prepare` against the account's known import hashes and store what it returns,
    /// all under one write lock so two imports of the same file cannot both insert rows.
    ///
    /// Rows whose hash is already present are dropped; the number of stored rows is
    /// returned next to `prepare`'s output.
    pub fn import_with<T, E>(
        &self,
        tenant_id: TenantId,
        account_id: BankAccountId,
        prepare: impl FnOnce(&HashSet<String>) -> Result<(Vec<BankTransaction>, T), E>,
    ) -> Result<(usize, T), E>
    where
        E: From<StoreError>,
    {
        let mut accounts = self.accounts.write().map_err(|_| StoreError::poisoned())?;
        let rows = accounts.entry((tenant_id, account_id)).or_default();

        let (fresh, out) = prepare(&rows.hashes)?;
        let mut stored = 0;
        for tx in fresh {
            if tx.tenant_id != tenant_id || tx.account_id != account_id {
                continue;
            }
            if rows.hashes.insert(tx.import_hash.clone()) {
                rows.transactions.push(tx);
                stored += 1;
            }
        }
        Ok((stored, out))
    }

    /// Transactions of one account, newest booking date first.
    pub fn transactions(&self, tenant_id: TenantId, account_id: BankAccountId) -> Vec<BankTransaction> {
        let mut txs = self
            .accounts
            .read()
            .ok()
            .and_then(|a| a.get(&(tenant_id, account_id)).map(|r| r.transactions.clone()))
            .unwrap_or_default();
        txs.sort_by(|a, b| b.booking_date.cmp(&a.booking_date).then(b.id.cmp(&a.id)));
        txs
    }

    pub fn patterns(&self, tenant_id: TenantId) -> Vec<RecurringPattern> {
        self.patterns
            .read()
            .ok()
            .and_then(|p| p.get(&tenant_id).cloned())
            .unwrap_or_default()
    }

    pub fn account_patterns(&self, tenant_id: TenantId, account_id: BankAccountId) -> Vec<RecurringPattern> {
        self.patterns(tenant_id)
            .into_iter()
            .filter(|p| p.account_id == account_id)
            .collect()
    }

    /// Replace the patterns of one account.
    pub fn replace_patterns(
        &self,
        tenant_id: TenantId,
        account_id: BankAccountId,
        patterns: Vec<RecurringPattern>,
    ) -> Result<(), StoreError> {
        let mut all = self.patterns.write().map_err(|_| StoreError::poisoned())?;
        let list = all.entry(tenant_id).or_default();
        list.retain(|p| p.account_id != account_id);
        list.extend(patterns.into_iter().filter(|p| p.tenant_id == tenant_id));
        Ok(())
    }

    pub fn set_pattern_status(
        &self,
        tenant_id: TenantId,
        pattern_id: Uuid,
        status: PatternStatus,
    ) -> Result<RecurringPattern, StoreError> {
        let mut all = self.patterns.write().map_err(|_| StoreError::poisoned())?;
        let pattern = all
            .get_mut(&tenant_id)
            .and_then(|list| list.iter_mut().find(|p| p.id == pattern_id))
            .ok_or_else(|| StoreError::NotFound(format!("recurring pattern {pattern_id}")))?;
        pattern.status = status;
        Ok(pattern.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use kontor_banking::{Direction, Frequency};
    use kontor_core::{AggregateId, Money};

    fn tx(tenant_id: TenantId, account_id: BankAccountId, hash: &str, day: u32) -> BankTransaction {
        let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        BankTransaction {
            id: Uuid::now_v7(),
            tenant_id,
            account_id,
            booking_date: date,
            value_date: date,
            amount: Money::eur(-1_000),
            purpose: "Miete".into(),
            counterparty_name: Some("Vermieter".into()),
            counterparty_iban: None,
            counterparty_bic: None,
            booking_text: None,
            customer_reference: None,
            bank_reference: None,
            import_hash: hash.into(),
            import_batch: Uuid::now_v7(),
            imported_at: Utc::now(),
        }
    }

    #[test]
    fn import_hashes_are_unique_per_account() {
        let store = InMemoryBankingStore::new();
        let t = TenantId::new();
        let (a, b) = (BankAccountId::new(AggregateId::new()), BankAccountId::new(AggregateId::new()));

        let (stored, seen) = store
            .import_with::<_, StoreError>(t, a, |known| Ok((vec![tx(t, a, "h1", 1), tx(t, a, "h2", 2)], known.len())))
            .unwrap();
        assert_eq!((stored, seen), (2, 0));

        let (stored, seen) = store
            .import_with::<_, StoreError>(t, a, |known| Ok((vec![tx(t, a, "h2", 2), tx(t, a, "h3", 3)], known.len())))
            .unwrap();
        assert_eq!((stored, seen), (1, 2));

        let (stored, _) = store
            .import_with::<_, StoreError>(t, b, |_| Ok((vec![tx(t, b, "h1", 1)], ())))
            .unwrap();
        assert_eq!(stored, 1);

        let listed = store.transactions(t, a);
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].import_hash, "h3");
        assert!(store.transactions(TenantId::new(), a).is_empty());
    }

    #[test]
    fn patterns_are_replaced_per_account_and_status_can_change() {
        let store = InMemoryBankingStore::new();
        let t = TenantId::new();
        let account = BankAccountId::new(AggregateId::new());
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let pattern = RecurringPattern {
            id: Uuid::now_v7(),
            tenant_id: t,
            account_id: account,
            counterparty_key: "vermieter".into(),
            direction: Direction::Outgoing,
            counterparty_name: None,
            counterparty_iban: None,
            frequency: Frequency::Monthly,
            average_amount: Money::eur(-1_000),
            amount_varies: false,
            occurrences: 3,
            last_date: date,
            next_expected: date,
            confidence: 1.0,
            status: PatternStatus::Suggested,
        };

        store.replace_patterns(t, account, vec![pattern.clone()]).unwrap();
        let updated = store.set_pattern_status(t, pattern.id, PatternStatus::Confirmed).unwrap();
        assert_eq!(updated.status, PatternStatus::Confirmed);
        assert_eq!(store.account_patterns(t, account).len(), 1);

        assert!(matches!(
            store.set_pattern_status(TenantId::new(), pattern.id, PatternStatus::Ignored),
            Err(StoreError::NotFound(_))
        ));
        store.replace_patterns(t, account, vec![]).unwrap();
        assert!(store.patterns(t).is_empty());
    }
}
