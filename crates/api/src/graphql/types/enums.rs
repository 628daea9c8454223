//! GraphQL mirrors of the domain enums. Values render as `SCREAMING_SNAKE_CASE`.

use async_graphql::Enum;

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_auth::TenantStatus")]
pub enum TenantStatus {
    Active,
    Suspended,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_auth::UserStatus")]
pub enum UserStatus {
    Active,
    Suspended,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_customers::CustomerStatus")]
pub enum CustomerStatus {
    Active,
    Archived,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_products::ProductStatus")]
pub enum ProductStatus {
    Active,
    Archived,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_products::BillingType")]
pub enum BillingType {
    OneTime,
    Recurring,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_contracts::BillingInterval")]
pub enum BillingInterval {
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_contracts::ContractStatus")]
pub enum ContractStatus {
    Draft,
    Active,
    Paused,
    Cancelled,
    Ended,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_invoicing::InvoiceStatus")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Cancelled,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_invoicing::ImportStatus")]
pub enum ImportStatus {
    Pending,
    Extracting,
    Extracted,
    ExtractionFailed,
    Confirmed,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_invoicing::FileKind")]
pub enum FileKind {
    Pdf,
    Xml,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_invoicing::ExtractionSource")]
pub enum ExtractionSource {
    Zugferd,
    Llm,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_invoicing::ResetPeriod")]
pub enum ResetPeriod {
    Never,
    Yearly,
    Monthly,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_banking::Frequency")]
pub enum Frequency {
    Weekly,
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_banking::Direction")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_banking::PatternStatus")]
pub enum PatternStatus {
    Suggested,
    Confirmed,
    Ignored,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_banking::CashflowSource")]
pub enum CashflowSource {
    RecurringPattern,
    OpenInvoice,
    ContractBilling,
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(remote = "kontor_audit::AuditAction")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}
