use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use kontor_core::{
    Aggregate, AggregateRoot, Auditable, Currency, DomainError, Iban, Money, TenantId, typed_aggregate_id,
};
use kontor_events::Event;

typed_aggregate_id!(
    /// Bank account identifier.
    BankAccountId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccountDetails {
    pub name: String,
    pub iban: Iban,
    pub bic: Option<String>,
    pub currency: Currency,
}

impl BankAccountDetails {
    fn validated(&self) -> Result<Self, DomainError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("account name cannot be empty"));
        }
        let bic = self
            .bic
            .as_deref()
            .map(|b| b.trim().to_ascii_uppercase())
            .filter(|b| !b.is_empty());
        if let Some(bic) = &bic {
            if !(bic.len() == 8 || bic.len() == 11) || !bic.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(DomainError::validation(format!("invalid BIC '{bic}'")));
            }
        }
        Ok(Self {
            name: name.to_string(),
            iban: self.iban.clone(),
            bic,
            currency: self.currency,
        })
    }
}

/// Aggregate root: BankAccount.
///
/// Transactions live in the banking store; the account only tracks the balance
/// reported by the newest imported statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankAccount {
    id: BankAccountId,
    tenant_id: Option<TenantId>,
    details: Option<BankAccountDetails>,
    balance: Option<Money>,
    balance_date: Option<NaiveDate>,
    version: u64,
}

impl BankAccount {
    pub fn empty(id: BankAccountId) -> Self {
        Self {
            id,
            tenant_id: None,
            details: None,
            balance: None,
            balance_date: None,
            version: 0,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn details(&self) -> Option<&BankAccountDetails> {
        self.details.as_ref()
    }

    pub fn currency(&self) -> Currency {
        self.details.as_ref().map(|d| d.currency).unwrap_or_default()
    }

    /// Zero until a statement has been imported.
    pub fn balance(&self) -> Money {
        self.balance.unwrap_or(Money::zero(self.currency()))
    }

    pub fn balance_date(&self) -> Option<NaiveDate> {
        self.balance_date
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<&BankAccountDetails, DomainError> {
        let details = self.details.as_ref().ok_or_else(DomainError::not_found)?;
        DomainError::check_tenant(self.tenant_id, tenant_id)?;
        Ok(details)
    }
}

impl AggregateRoot for BankAccount {
    type Id = BankAccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankAccountCommand {
    Open {
        tenant_id: TenantId,
        account_id: BankAccountId,
        details: BankAccountDetails,
        occurred_at: DateTime<Utc>,
    },
    Update {
        tenant_id: TenantId,
        details: BankAccountDetails,
        occurred_at: DateTime<Utc>,
    },
    /// Balance from a statement's closing balance. Older dates are ignored.
    RecordBalance {
        tenant_id: TenantId,
        balance: Money,
        as_of: NaiveDate,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankAccountEvent {
    Opened {
        tenant_id: TenantId,
        account_id: BankAccountId,
        details: BankAccountDetails,
        occurred_at: DateTime<Utc>,
    },
    Updated {
        details: BankAccountDetails,
        occurred_at: DateTime<Utc>,
    },
    BalanceRecorded {
        balance: Money,
        as_of: NaiveDate,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for BankAccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BankAccountEvent::Opened { .. } => "banking.account.opened",
            BankAccountEvent::Updated { .. } => "banking.account.updated",
            BankAccountEvent::BalanceRecorded { .. } => "banking.account.balance_recorded",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BankAccountEvent::Opened { occurred_at, .. }
            | BankAccountEvent::Updated { occurred_at, .. }
            | BankAccountEvent::BalanceRecorded { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for BankAccount {
    type Command = BankAccountCommand;
    type Event = BankAccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BankAccountEvent::Opened {
                tenant_id,
                account_id,
                details,
                ..
            } => {
                self.id = *account_id;
                self.tenant_id = Some(*tenant_id);
                self.details = Some(details.clone());
            }
            BankAccountEvent::Updated { details, .. } => self.details = Some(details.clone()),
            BankAccountEvent::BalanceRecorded { balance, as_of, .. } => {
                self.balance = Some(*balance);
                self.balance_date = Some(*as_of);
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BankAccountCommand::Open {
                tenant_id,
                account_id,
                details,
                occurred_at,
            } => {
                if self.details.is_some() {
                    return Err(DomainError::conflict("bank account already exists"));
                }
                Ok(vec![BankAccountEvent::Opened {
                    tenant_id: *tenant_id,
                    account_id: *account_id,
                    details: details.validated()?,
                    occurred_at: *occurred_at,
                }])
            }
            BankAccountCommand::Update {
                tenant_id,
                details,
                occurred_at,
            } => {
                let current = self.ensure_tenant(*tenant_id)?;
                let details = details.validated()?;
                if details.iban != current.iban {
                    return Err(DomainError::validation("the IBAN of an account cannot change"));
                }
                if self.balance.is_some() && details.currency != current.currency {
                    return Err(DomainError::invariant("currency is fixed once a balance exists"));
                }
                if &details == current {
                    return Ok(vec![]);
                }
                Ok(vec![BankAccountEvent::Updated {
                    details,
                    occurred_at: *occurred_at,
                }])
            }
            BankAccountCommand::RecordBalance {
                tenant_id,
                balance,
                as_of,
                occurred_at,
            } => {
                let details = self.ensure_tenant(*tenant_id)?;
                if balance.currency != details.currency {
                    return Err(DomainError::validation(format!(
                        "statement currency {} does not match account currency {}",
                        balance.currency, details.currency
                    )));
                }
                if self.balance_date.is_some_and(|d| d > *as_of) {
                    return Ok(vec![]);
                }
                Ok(vec![BankAccountEvent::BalanceRecorded {
                    balance: *balance,
                    as_of: *as_of,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl Auditable for BankAccount {
    const ENTITY_TYPE: &'static str = "bank_account";

    fn audit_snapshot(&self) -> Option<JsonValue> {
        let d = self.details.as_ref()?;
        Some(json!({
            "name": d.name,
            "iban": d.iban,
            "bic": d.bic,
            "currency": d.currency,
            "balance": self.balance,
            "balance_date": self.balance_date,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> BankAccountDetails {
        BankAccountDetails {
            name: " Geschäftskonto ".into(),
            iban: "DE02120300000000202051".parse().unwrap(),
            bic: Some("bylademm".into()),
            currency: Currency::EUR,
        }
    }

    fn opened(tenant_id: TenantId) -> BankAccount {
        let id = BankAccountId::generate();
        let mut acc = BankAccount::empty(id);
        let cmd = BankAccountCommand::Open { tenant_id, account_id: id, details: details(), occurred_at: Utc::now() };
        for e in acc.handle(&cmd).unwrap() {
            acc.apply(&e);
        }
        acc
    }

    #[test]
    fn open_normalizes_name_and_bic() {
        let acc = opened(TenantId::new());
        let d = acc.details().unwrap();
        assert_eq!(d.name, "Geschäftskonto");
        assert_eq!(d.bic.as_deref(), Some("BYLADEMM"));
        assert_eq!(acc.balance(), Money::eur(0));
    }

    #[test]
    fn older_statements_do_not_overwrite_the_balance() {
        let t = TenantId::new();
        let mut acc = opened(t);
        let record = |cents, day| BankAccountCommand::RecordBalance {
            tenant_id: t,
            balance: Money::eur(cents),
            as_of: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            occurred_at: Utc::now(),
        };
        for e in acc.handle(&record(500, 10)).unwrap() {
            acc.apply(&e);
        }
        assert!(acc.handle(&record(100, 9)).unwrap().is_empty());
        assert_eq!(acc.balance(), Money::eur(500));
    }

    #[test]
    fn iban_is_immutable_and_bic_is_checked() {
        let t = TenantId::new();
        let acc = opened(t);
        let mut other = details();
        other.iban = "GB82WEST12345698765432".parse().unwrap();
        assert!(acc.handle(&BankAccountCommand::Update { tenant_id: t, details: other, occurred_at: Utc::now() }).is_err());

        let mut bad = details();
        bad.bic = Some("XYZ".into());
        assert!(acc.handle(&BankAccountCommand::Update { tenant_id: t, details: bad, occurred_at: Utc::now() }).is_err());
    }
}
