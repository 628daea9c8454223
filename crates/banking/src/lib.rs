//! Banking domain module: accounts, MT940 statement import, recurring payments and the
//! liquidity forecast. Pure domain logic (no IO, no HTTP, no storage).

pub mod account;
pub mod forecast;
pub mod mt940;
pub mod recurring;
pub mod transaction;

pub use account::{BankAccount, BankAccountCommand, BankAccountDetails, BankAccountEvent, BankAccountId};
pub use forecast::{
    CashflowSource, DEFAULT_FORECAST_DAYS, ForecastInput, ForecastPoint, LiquidityForecast, MAX_FORECAST_DAYS,
    PlannedCashflow, forecast,
};
pub use mt940::{Balance, EntryMark, Mt940Error, Statement, StatementLine, TransactionDetails};
pub use recurring::{
    DEFAULT_MIN_OCCURRENCES, Direction, Frequency, PatternStatus, RecurringPattern, detect_patterns, merge_detected,
};
pub use transaction::{
    BankTransaction, ImportContext, ImportSummary, PreparedImport, StatementMismatch, import_hash, prepare_import,
};
