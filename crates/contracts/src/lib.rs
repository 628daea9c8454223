//! `kontor-contracts`: recurring customer contracts and their billing schedule.

pub mod billing;
pub mod contract;

pub use billing::{BillingInterval, BillingPeriod, PeriodTotals, add_months};
pub use contract::{Contract, ContractCommand, ContractEvent, ContractId, ContractItem, ContractStatus, ContractTerms};
