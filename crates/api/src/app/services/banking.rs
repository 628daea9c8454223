//! Bank accounts, MT940 statement import, recurring patterns and the liquidity forecast.

use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use kontor_auth::permissions::names;
use kontor_banking::{
    BankAccount, BankAccountCommand, BankAccountDetails, BankAccountId, BankTransaction, CashflowSource,
    DEFAULT_FORECAST_DAYS, ForecastInput, ImportContext, ImportSummary, LiquidityForecast, PatternStatus,
    PlannedCashflow, RecurringPattern, detect_patterns, forecast, merge_detected, mt940, prepare_import,
};
use kontor_contracts::ContractStatus;
use kontor_core::{AggregateRoot, Currency, Money};
use kontor_infra::projections::aggregate_types;
use kontor_infra::read_model::Scope;
use kontor_invoicing::InvoiceStatus;

use super::{AppServices, keys};
use crate::app::errors::ApiError;
use crate::context::Session;

/// Result of one statement upload.
#[derive(Debug, Clone)]
pub struct StatementImport {
    pub account: BankAccount,
    pub summary: ImportSummary,
    pub patterns: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ForecastOptions {
    pub days: Option<u32>,
    pub today: Option<NaiveDate>,
    pub include_suggested: bool,
    pub include_contracts: bool,
}

impl AppServices {
    // ── accounts ─────────────────────────────────────────────────────────────

    pub fn bank_accounts(&self, session: &Session) -> Result<Vec<BankAccount>, ApiError> {
        self.authorize(session, &names::BANKING_READ)?;
        Ok(self.account_list(session))
    }

    fn account_list(&self, session: &Session) -> Vec<BankAccount> {
        let mut accounts: Vec<BankAccount> = self
            .projections
            .bank_accounts
            .list(session.tenant_id())
            .into_iter()
            .filter(|a| a.details().is_some())
            .collect();
        accounts.sort_by(|a, b| account_name(a).cmp(account_name(b)));
        accounts
    }

    pub fn bank_account(&self, session: &Session, account_id: BankAccountId) -> Result<BankAccount, ApiError> {
        self.authorize(session, &names::BANKING_READ)?;
        self.account_record(session, account_id)
    }

    fn account_record(&self, session: &Session, account_id: BankAccountId) -> Result<BankAccount, ApiError> {
        self.projections
            .bank_accounts
            .get(session.tenant_id(), account_id.aggregate_id())
            .filter(|a| a.details().is_some())
            .ok_or_else(|| ApiError::not_found("bank account"))
    }

    pub fn open_bank_account(&self, session: &Session, details: BankAccountDetails) -> Result<BankAccount, ApiError> {
        self.authorize(session, &names::BANKING_WRITE)?;
        let tenant_id = session.tenant_id();
        let account_id = BankAccountId::generate();
        let iban = details.iban.as_str().to_string();
        let scope = Scope::Tenant(tenant_id);
        self.unique
            .claim(scope, keys::BANK_IBAN, &iban, account_id.aggregate_id())
            .map_err(|_| ApiError::Conflict(format!("an account with IBAN {iban} already exists")))?;

        let result = self.execute(
            tenant_id,
            Some(session.user_id()),
            account_id.aggregate_id(),
            aggregate_types::BANK_ACCOUNT,
            BankAccountCommand::Open {
                tenant_id,
                account_id,
                details,
                occurred_at: Utc::now(),
            },
            |_, id| BankAccount::empty(BankAccountId::new(id)),
        );
        if result.is_err() {
            self.unique.release(scope, keys::BANK_IBAN, &iban, account_id.aggregate_id());
        }
        result
    }

    pub fn update_bank_account(
        &self,
        session: &Session,
        account_id: BankAccountId,
        details: BankAccountDetails,
    ) -> Result<BankAccount, ApiError> {
        self.authorize(session, &names::BANKING_WRITE)?;
        let current = self.account_record(session, account_id)?;
        let old_iban = current.details().map(|d| d.iban.as_str().to_string()).unwrap_or_default();
        let new_iban = details.iban.as_str().to_string();
        let scope = Scope::Tenant(session.tenant_id());
        let owner = account_id.aggregate_id();
        self.unique
            .rename(scope, keys::BANK_IBAN, &old_iban, &new_iban, owner)
            .map_err(|_| ApiError::Conflict(format!("an account with IBAN {new_iban} already exists")))?;

        let result = self.account_command(
            session,
            account_id,
            BankAccountCommand::Update {
                tenant_id: session.tenant_id(),
                details,
                occurred_at: Utc::now(),
            },
        );
        if result.is_err() {
            if let Err(e) = self.unique.restore(scope, keys::BANK_IBAN, &new_iban, &old_iban, owner) {
                tracing::warn!(error = %e, account_id = %account_id, iban = %old_iban, "could not restore the IBAN claim after a failed update");
            }
        }
        result
    }

    fn account_command(
        &self,
        session: &Session,
        account_id: BankAccountId,
        command: BankAccountCommand,
    ) -> Result<BankAccount, ApiError> {
        self.execute(
            session.tenant_id(),
            Some(session.user_id()),
            account_id.aggregate_id(),
            aggregate_types::BANK_ACCOUNT,
            command,
            |_, id| BankAccount::empty(BankAccountId::new(id)),
        )
    }

    // ── statements & transactions ────────────────────────────────────────────

    /// Parse an MT940 file, store new transactions, update the balance from the newest
    /// closing balance and re-run pattern detection for the account.
    #[tracing::instrument(skip_all, fields(tenant_id = %session.tenant_id(), account_id = %account_id))]
    pub fn import_statement(&self, session: &Session, account_id: BankAccountId, bytes: &[u8]) -> Result<StatementImport, ApiError> {
        self.authorize(session, &names::BANKING_WRITE)?;
        if bytes.len() > self.config.max_upload_bytes {
            return Err(ApiError::validation("statement file is too large"));
        }
        let mut account = self.account_record(session, account_id)?;
        let statements = mt940::parse_bytes(bytes)?;

        let tenant_id = session.tenant_id();
        let now = Utc::now();
        let (stored, summary) = self.banking.import_with(tenant_id, account_id, |known| {
            let ctx = ImportContext {
                tenant_id,
                account_id,
                currency: account.currency(),
                existing_hashes: known,
                batch_id: Uuid::now_v7(),
                now,
            };
            let prepared = prepare_import(&ctx, &statements).map_err(ApiError::from)?;
            Ok::<_, ApiError>((prepared.transactions, prepared.summary))
        })?;

        if let Some(closing) = summary.closing_balance {
            account = self.account_command(
                session,
                account_id,
                BankAccountCommand::RecordBalance {
                    tenant_id,
                    balance: Money::new(closing.amount, closing.currency),
                    as_of: closing.date,
                    occurred_at: now,
                },
            )?;
        }

        let patterns = if stored > 0 { self.redetect(session, account_id)?.len() } else { 0 };
        tracing::info!(
            imported = stored,
            duplicates = summary.duplicates,
            mismatched = summary.mismatched_statements.len(),
            "statement imported"
        );
        Ok(StatementImport {
            account,
            summary,
            patterns,
        })
    }

    pub fn bank_transactions(
        &self,
        session: &Session,
        account_id: BankAccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<BankTransaction>, ApiError> {
        self.authorize(session, &names::BANKING_READ)?;
        self.account_record(session, account_id)?;
        Ok(self
            .banking
            .transactions(session.tenant_id(), account_id)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    // ── recurring patterns ───────────────────────────────────────────────────

    pub fn recurring_patterns(
        &self,
        session: &Session,
        account_id: Option<BankAccountId>,
        status: Option<PatternStatus>,
    ) -> Result<Vec<RecurringPattern>, ApiError> {
        self.authorize(session, &names::BANKING_READ)?;
        let tenant_id = session.tenant_id();
        let patterns = match account_id {
            Some(id) => self.banking.account_patterns(tenant_id, id),
            None => self.banking.patterns(tenant_id),
        };
        Ok(patterns
            .into_iter()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .collect())
    }

    pub fn detect_recurring(&self, session: &Session, account_id: BankAccountId) -> Result<Vec<RecurringPattern>, ApiError> {
        self.authorize(session, &names::BANKING_WRITE)?;
        self.account_record(session, account_id)?;
        self.redetect(session, account_id)
    }

    fn redetect(&self, session: &Session, account_id: BankAccountId) -> Result<Vec<RecurringPattern>, ApiError> {
        let tenant_id = session.tenant_id();
        let transactions = self.banking.transactions(tenant_id, account_id);
        let detected = detect_patterns(tenant_id, account_id, &transactions, self.config.recurring_min_occurrences);
        let merged = merge_detected(&self.banking.account_patterns(tenant_id, account_id), detected);
        self.banking.replace_patterns(tenant_id, account_id, merged.clone())?;
        tracing::debug!(patterns = merged.len(), "recurring patterns detected");
        Ok(merged)
    }

    pub fn set_pattern_status(&self, session: &Session, pattern_id: Uuid, status: PatternStatus) -> Result<RecurringPattern, ApiError> {
        self.authorize(session, &names::BANKING_WRITE)?;
        Ok(self.banking.set_pattern_status(session.tenant_id(), pattern_id, status)?)
    }

    // ── forecast ─────────────────────────────────────────────────────────────

    /// The forecast runs in the currency of the first account; accounts and cash flows in
    /// other currencies are left out.
    pub fn liquidity_forecast(&self, session: &Session, options: ForecastOptions) -> Result<LiquidityForecast, ApiError> {
        self.authorize(session, &names::BANKING_READ)?;
        let tenant_id = session.tenant_id();
        let today = options.today.unwrap_or_else(|| Utc::now().date_naive());
        let days = options.days.unwrap_or(DEFAULT_FORECAST_DAYS);

        let accounts = self.account_list(session);
        let currency = accounts.first().map_or(Currency::EUR, BankAccount::currency);
        let start_cents: i64 = accounts
            .iter()
            .filter(|a| a.currency() == currency)
            .map(|a| a.balance().cents)
            .sum();

        let patterns: Vec<RecurringPattern> = self
            .banking
            .patterns(tenant_id)
            .into_iter()
            .filter(|p| p.average_amount.currency == currency)
            .collect();

        let receivables = self
            .projections
            .invoices
            .list(tenant_id)
            .into_iter()
            .filter(|i| i.is_created() && i.status() == InvoiceStatus::Open && i.currency() == currency)
            .filter_map(|i| {
                let due = i.due_date()?;
                let outstanding = i.outstanding();
                (outstanding.cents > 0).then(|| PlannedCashflow {
                    date: due,
                    amount: outstanding,
                    source: CashflowSource::OpenInvoice,
                    label: format!("Invoice {}", i.number()),
                })
            })
            .collect();

        let contract_billings = if options.include_contracts {
            self.contract_cashflows(session, today, days, currency)
        } else {
            Vec::new()
        };

        Ok(forecast(ForecastInput {
            today,
            days,
            currency,
            start_balance: Money::new(start_cents, currency),
            patterns: &patterns,
            include_suggested: options.include_suggested,
            receivables,
            contract_billings,
        })?)
    }

    /// Gross amount of every unbilled period starting within the horizon.
    fn contract_cashflows(&self, session: &Session, today: NaiveDate, days: u32, currency: Currency) -> Vec<PlannedCashflow> {
        let end = today + Duration::days(i64::from(days.max(1)) - 1);
        let mut out = Vec::new();
        for contract in self.projections.contracts.list(session.tenant_id()) {
            let Some(terms) = contract.terms() else {
                continue;
            };
            if !matches!(contract.status(), ContractStatus::Active | ContractStatus::Cancelled)
                || terms.currency() != currency
            {
                continue;
            }
            for period in contract.due_periods(end) {
                let Ok(totals) = contract.period_totals(period.index) else {
                    continue;
                };
                if totals.gross.cents == 0 {
                    continue;
                }
                out.push(PlannedCashflow {
                    date: period.start.max(today),
                    amount: totals.gross,
                    source: CashflowSource::ContractBilling,
                    label: format!("{} ({})", terms.title, contract.id()),
                });
            }
        }
        out
    }
}

fn account_name(account: &BankAccount) -> &str {
    account.details().map(|d| d.name.as_str()).unwrap_or_default()
}
