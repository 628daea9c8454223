pub mod audit;
pub mod banking;
pub mod catalog;
pub mod contract;
pub mod enums;
pub mod identity;
pub mod imported;
pub mod invoice;
pub mod money;

pub use audit::AuditEntry;
pub use banking::{BankAccount, BankTransaction, LiquidityForecast, RecurringPattern, StatementImportResult};
pub use catalog::{Customer, CustomerMatch, Product};
pub use contract::Contract;
pub use identity::{AuthError, AuthPayload, LoginResult, MeResult, Role, Tenant, User, Viewer};
pub use imported::ImportedInvoice;
pub use invoice::{Invoice, NumberScheme};
pub use money::Money;
