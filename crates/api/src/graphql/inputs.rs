//! Input objects and their conversion into service arguments. Conversion errors are
//! `VALIDATION` errors.

use std::str::FromStr;

use async_graphql::{ID, InputObject, Json};
use chrono::{DateTime, NaiveDate, Utc};

use kontor_audit::AuditQuery;
use kontor_auth::{PermissionDict, Role};
use kontor_banking::BankAccountDetails;
use kontor_contracts::{ContractItem, ContractTerms};
use kontor_core::{Currency, Iban, Money, Quantity};
use kontor_customers::{Address, CustomerDetails, MatchQuery};
use kontor_invoicing::{InvoiceData, NumberPattern, SchemeUpdate};
use kontor_products::ProductDetails;

use crate::app::errors::ApiError;
use crate::app::services::{self, ForecastOptions, IssueRequest, RequestedLine};
use crate::graphql::types::enums::{AuditAction, BillingInterval, BillingType, ResetPeriod};

fn parse<T: FromStr>(id: &ID, what: &str) -> Result<T, ApiError> {
    id.as_str()
        .parse()
        .map_err(|_| ApiError::validation(format!("invalid {what} id: {}", id.as_str())))
}

fn currency(code: Option<&str>) -> Result<Currency, ApiError> {
    match code {
        Some(code) => Ok(code.parse()?),
        None => Ok(Currency::EUR),
    }
}

fn quantity(value: &str) -> Result<Quantity, ApiError> {
    Ok(value.parse()?)
}

#[derive(InputObject)]
pub struct SignupInput {
    pub tenant_name: String,
    /// `[a-z0-9-]{2,63}`; normalized before the check.
    pub slug: String,
    pub email: String,
    pub display_name: String,
    pub password: String,
}

impl From<SignupInput> for services::SignupInput {
    fn from(input: SignupInput) -> Self {
        Self {
            tenant_name: input.tenant_name,
            slug: input.slug,
            email: input.email,
            display_name: input.display_name,
            password: input.password,
        }
    }
}

#[derive(InputObject)]
pub struct UserInput {
    pub email: String,
    pub display_name: String,
    pub password: String,
    #[graphql(default)]
    pub roles: Vec<String>,
}

impl From<UserInput> for services::NewUser {
    fn from(input: UserInput) -> Self {
        Self {
            email: input.email,
            display_name: input.display_name,
            password: input.password,
            roles: input.roles.into_iter().map(Role::new).collect(),
        }
    }
}

#[derive(InputObject)]
pub struct RoleInput {
    pub name: String,
    pub description: Option<String>,
    /// `{module: [action, ...]}`.
    pub permissions: Json<PermissionDict>,
}

#[derive(InputObject)]
pub struct CustomerInput {
    pub customer_number: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub vat_id: Option<String>,
    pub iban: Option<String>,
}

impl CustomerInput {
    pub fn into_details(self) -> Result<CustomerDetails, ApiError> {
        let iban = self
            .iban
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Iban::from_str)
            .transpose()?;
        Ok(CustomerDetails {
            customer_number: self.customer_number,
            name: self.name,
            email: self.email,
            phone: self.phone,
            address: Address {
                street: self.street,
                postal_code: self.postal_code,
                city: self.city,
                country: self.country,
            },
            vat_id: self.vat_id,
            iban,
        })
    }
}

#[derive(InputObject)]
pub struct CustomerMatchInput {
    pub name: Option<String>,
    pub iban: Option<String>,
    pub vat_id: Option<String>,
}

impl From<CustomerMatchInput> for MatchQuery {
    fn from(input: CustomerMatchInput) -> Self {
        Self {
            name: input.name,
            iban: input.iban,
            vat_id: input.vat_id,
        }
    }
}

#[derive(InputObject)]
pub struct ProductInput {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub unit: String,
    pub net_price_cents: i64,
    /// Defaults to EUR.
    pub currency: Option<String>,
    #[graphql(default = 1900)]
    pub tax_rate_bp: u32,
    #[graphql(default_with = "BillingType::OneTime")]
    pub billing_type: BillingType,
}

impl ProductInput {
    pub fn into_details(self) -> Result<ProductDetails, ApiError> {
        let currency = currency(self.currency.as_deref())?;
        Ok(ProductDetails {
            sku: self.sku,
            name: self.name,
            description: self.description,
            unit: self.unit,
            net_price: Money::new(self.net_price_cents, currency),
            tax_rate_bp: self.tax_rate_bp,
            billing_type: self.billing_type.into(),
        })
    }
}

#[derive(InputObject)]
pub struct ContractItemInput {
    pub product_id: Option<ID>,
    pub description: String,
    /// Decimal string, e.g. `"1"` or `"2.5"`.
    #[graphql(default_with = "String::from(\"1\")")]
    pub quantity: String,
    pub unit_price_cents: i64,
    #[graphql(default = 1900)]
    pub tax_rate_bp: u32,
    #[graphql(default_with = "BillingType::Recurring")]
    pub billing_type: BillingType,
}

#[derive(InputObject)]
pub struct ContractInput {
    pub customer_id: ID,
    pub title: String,
    pub items: Vec<ContractItemInput>,
    pub interval: BillingInterval,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    #[graphql(default)]
    pub notice_period_months: u32,
    #[graphql(default = 14)]
    pub payment_terms_days: u32,
    /// One currency for every item; defaults to EUR.
    pub currency: Option<String>,
}

impl ContractInput {
    pub fn into_terms(self) -> Result<ContractTerms, ApiError> {
        let currency = currency(self.currency.as_deref())?;
        let items = self
            .items
            .into_iter()
            .map(|item| -> Result<ContractItem, ApiError> {
                Ok(ContractItem {
                    product_id: item.product_id.as_ref().map(|id| parse(id, "product")).transpose()?,
                    description: item.description,
                    quantity: quantity(&item.quantity)?,
                    unit_price: Money::new(item.unit_price_cents, currency),
                    tax_rate_bp: item.tax_rate_bp,
                    billing_type: item.billing_type.into(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ContractTerms {
            customer_id: parse(&self.customer_id, "customer")?,
            title: self.title,
            items,
            interval: self.interval.into(),
            start_date: self.start_date,
            end_date: self.end_date,
            notice_period_months: self.notice_period_months,
            payment_terms_days: self.payment_terms_days,
        })
    }
}

/// With a product, omitted description, price and tax rate are taken from it.
#[derive(InputObject)]
pub struct InvoiceLineInput {
    pub product_id: Option<ID>,
    pub description: Option<String>,
    #[graphql(default_with = "String::from(\"1\")")]
    pub quantity: String,
    pub unit_price_cents: Option<i64>,
    pub tax_rate_bp: Option<u32>,
}

#[derive(InputObject)]
pub struct InvoiceInput {
    pub customer_id: ID,
    pub lines: Vec<InvoiceLineInput>,
    /// Currency of explicit unit prices; defaults to EUR.
    pub currency: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub payment_terms_days: Option<u32>,
}

impl InvoiceInput {
    pub fn into_request(self) -> Result<IssueRequest, ApiError> {
        let currency = currency(self.currency.as_deref())?;
        let lines = self
            .lines
            .into_iter()
            .map(|line| -> Result<RequestedLine, ApiError> {
                Ok(RequestedLine {
                    product_id: line.product_id.as_ref().map(|id| parse(id, "product")).transpose()?,
                    description: line.description,
                    quantity: quantity(&line.quantity)?,
                    unit_price: line.unit_price_cents.map(|c| Money::new(c, currency)),
                    tax_rate_bp: line.tax_rate_bp,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if lines.is_empty() {
            return Err(ApiError::validation("an invoice needs at least one line"));
        }
        Ok(IssueRequest {
            customer_id: parse(&self.customer_id, "customer")?,
            lines,
            issue_date: self.issue_date,
            payment_terms_days: self.payment_terms_days,
        })
    }
}

#[derive(InputObject)]
pub struct NumberSchemeInput {
    /// Tokens: `{YYYY}`, `{YY}`, `{MM}`, `{DD}`, `{NUMBER}`, `{NUMBER:n}`.
    pub pattern: Option<String>,
    pub reset_period: Option<ResetPeriod>,
    #[graphql(default)]
    pub reset_counter: bool,
    /// Next number to issue.
    pub start_at: Option<u64>,
}

impl NumberSchemeInput {
    pub fn into_update(self) -> Result<SchemeUpdate, ApiError> {
        let pattern = match self.pattern {
            Some(p) => Some(p.parse::<NumberPattern>().map_err(ApiError::from)?),
            None => None,
        };
        Ok(SchemeUpdate {
            pattern,
            reset_period: self.reset_period.map(Into::into),
            reset_counter: self.reset_counter,
            start_at: self.start_at,
        })
    }
}

/// Corrections applied on confirmation; amounts in cents.
#[derive(InputObject, Default)]
pub struct InvoiceDataInput {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub vendor_name: Option<String>,
    pub vendor_vat_id: Option<String>,
    pub vendor_iban: Option<String>,
    pub currency: Option<String>,
    pub net_amount: Option<i64>,
    pub tax_amount: Option<i64>,
    pub gross_amount: Option<i64>,
}

impl From<InvoiceDataInput> for InvoiceData {
    fn from(input: InvoiceDataInput) -> Self {
        Self {
            invoice_number: input.invoice_number,
            invoice_date: input.invoice_date,
            due_date: input.due_date,
            vendor_name: input.vendor_name,
            vendor_vat_id: input.vendor_vat_id,
            vendor_iban: input.vendor_iban,
            currency: input.currency,
            net_amount: input.net_amount,
            tax_amount: input.tax_amount,
            gross_amount: input.gross_amount,
        }
    }
}

#[derive(InputObject)]
pub struct BankAccountInput {
    pub name: String,
    pub iban: String,
    pub bic: Option<String>,
    /// Defaults to EUR.
    pub currency: Option<String>,
}

impl BankAccountInput {
    pub fn into_details(self) -> Result<BankAccountDetails, ApiError> {
        Ok(BankAccountDetails {
            name: self.name,
            iban: self.iban.parse()?,
            bic: self.bic,
            currency: currency(self.currency.as_deref())?,
        })
    }
}

#[derive(InputObject, Default)]
pub struct AuditQueryInput {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor_id: Option<ID>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    #[graphql(default)]
    pub offset: u32,
}

impl AuditQueryInput {
    pub fn into_query(self) -> Result<AuditQuery, ApiError> {
        Ok(AuditQuery {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            actor: self.actor_id.as_ref().map(|id| parse(id, "user")).transpose()?,
            action: self.action.map(Into::into),
            from: self.from,
            to: self.to,
            limit: self.limit.map(|l| l as usize),
            offset: self.offset as usize,
        })
    }
}

#[derive(InputObject)]
pub struct ForecastInput {
    /// 1..=730, default 90.
    pub days: Option<u32>,
    /// Defaults to the current date.
    pub today: Option<NaiveDate>,
    #[graphql(default = true)]
    pub include_suggested: bool,
    #[graphql(default = true)]
    pub include_contracts: bool,
}

impl Default for ForecastInput {
    fn default() -> Self {
        Self {
            days: None,
            today: None,
            include_suggested: true,
            include_contracts: true,
        }
    }
}

impl From<ForecastInput> for ForecastOptions {
    fn from(input: ForecastInput) -> Self {
        Self {
            days: input.days,
            today: input.today,
            include_suggested: input.include_suggested,
            include_contracts: input.include_contracts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kontor_customers::CustomerId;

    fn contract_input(quantity: &str) -> ContractInput {
        ContractInput {
            customer_id: ID(CustomerId::generate().to_string()),
            title: "Hosting".into(),
            items: vec![ContractItemInput {
                product_id: None,
                description: "Server".into(),
                quantity: quantity.into(),
                unit_price_cents: 4_900,
                tax_rate_bp: 1900,
                billing_type: BillingType::Recurring,
            }],
            interval: BillingInterval::Monthly,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            end_date: None,
            notice_period_months: 3,
            payment_terms_days: 14,
            currency: None,
        }
    }

    #[test]
    fn contract_input_converts_quantity_and_currency() {
        let terms = contract_input("2.5").into_terms().unwrap();
        assert_eq!(terms.items[0].quantity, Quantity::from_milli(2_500));
        assert_eq!(terms.items[0].unit_price, Money::eur(4_900));
        assert_eq!(terms.interval, kontor_contracts::BillingInterval::Monthly);
    }

    #[test]
    fn bad_quantities_and_ids_are_validation_errors() {
        assert!(matches!(contract_input("two").into_terms(), Err(ApiError::Validation(_))));

        let mut input = contract_input("1");
        input.customer_id = ID::from("not-a-uuid");
        assert!(matches!(input.into_terms(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn empty_invoices_are_rejected_before_dispatch() {
        let input = InvoiceInput {
            customer_id: ID(CustomerId::generate().to_string()),
            lines: vec![],
            currency: None,
            issue_date: None,
            payment_terms_days: None,
        };
        assert!(matches!(input.into_request(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn blank_customer_iban_is_none() {
        let input = CustomerInput {
            customer_number: None,
            name: "Muster GmbH".into(),
            email: None,
            phone: None,
            street: None,
            postal_code: None,
            city: None,
            country: None,
            vat_id: None,
            iban: Some("  ".into()),
        };
        assert_eq!(input.into_details().unwrap().iban, None);
    }
}
