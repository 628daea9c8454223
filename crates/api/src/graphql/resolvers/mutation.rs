use async_graphql::{Context, ID, Object};
use chrono::NaiveDate;
use uuid::Uuid;

use kontor_auth::Role as RoleName;
use kontor_core::{Currency, Money as DomainMoney};
use kontor_invoicing::InvoiceData;

use crate::app::errors::ApiError;
use crate::graphql::inputs::{
    BankAccountInput, ContractInput, CustomerInput, InvoiceDataInput, InvoiceInput, NumberSchemeInput, ProductInput,
    RoleInput, SignupInput, UserInput,
};
use crate::graphql::types::enums::PatternStatus;
use crate::graphql::types::{
    AuthError, AuthPayload, BankAccount, Contract, Customer, ImportedInvoice, Invoice, LoginResult, NumberScheme,
    Product, RecurringPattern, Role, StatementImportResult, Tenant, User,
};
use crate::graphql::{GqlResultExt, parse_id, parse_opt_id, services, session};

/// Root mutation object.
pub struct Mutation;

#[Object]
impl Mutation {
    // ── auth ────────────────────────────────────────────────────────────────

    /// Create a tenant and its first admin user; returns a session for that user.
    async fn signup(&self, ctx: &Context<'_>, input: SignupInput) -> async_graphql::Result<AuthPayload> {
        Ok(services(ctx)?.signup(input.into()).gql()?.into())
    }

    /// Wrong credentials and suspended accounts are reported as `AuthError`, not as
    /// GraphQL errors.
    async fn login(
        &self,
        ctx: &Context<'_>,
        tenant_slug: String,
        email: String,
        password: String,
    ) -> async_graphql::Result<LoginResult> {
        let result = match services(ctx)?.login(&tenant_slug, &email, &password).gql()? {
            Ok(session) => LoginResult::Session(session.into()),
            Err(failure) => LoginResult::Error(AuthError::from(failure)),
        };
        Ok(result)
    }

    async fn rename_tenant(&self, ctx: &Context<'_>, name: String) -> async_graphql::Result<Tenant> {
        Ok(services(ctx)?.rename_tenant(session(ctx)?, name).gql()?.into())
    }

    // ── users & roles ───────────────────────────────────────────────────────

    async fn create_user(&self, ctx: &Context<'_>, input: UserInput) -> async_graphql::Result<User> {
        Ok(services(ctx)?.create_user(session(ctx)?, input.into()).gql()?.into())
    }

    async fn update_user_profile(&self, ctx: &Context<'_>, id: ID, display_name: String) -> async_graphql::Result<User> {
        let id = parse_id(&id, "user")?;
        Ok(services(ctx)?
            .update_user_profile(session(ctx)?, id, display_name)
            .gql()?
            .into())
    }

    /// Change the caller's own password.
    async fn change_password(
        &self,
        ctx: &Context<'_>,
        current_password: String,
        new_password: String,
    ) -> async_graphql::Result<User> {
        Ok(services(ctx)?
            .change_password(session(ctx)?, &current_password, &new_password)
            .gql()?
            .into())
    }

    async fn assign_role(&self, ctx: &Context<'_>, user_id: ID, role: String) -> async_graphql::Result<User> {
        let user_id = parse_id(&user_id, "user")?;
        Ok(services(ctx)?
            .assign_role(session(ctx)?, user_id, RoleName::new(role))
            .gql()?
            .into())
    }

    async fn revoke_role(&self, ctx: &Context<'_>, user_id: ID, role: String) -> async_graphql::Result<User> {
        let user_id = parse_id(&user_id, "user")?;
        Ok(services(ctx)?
            .revoke_role(session(ctx)?, user_id, RoleName::new(role))
            .gql()?
            .into())
    }

    async fn suspend_user(
        &self,
        ctx: &Context<'_>,
        user_id: ID,
        #[graphql(default)] reason: String,
    ) -> async_graphql::Result<User> {
        let user_id = parse_id(&user_id, "user")?;
        Ok(services(ctx)?.suspend_user(session(ctx)?, user_id, reason).gql()?.into())
    }

    async fn activate_user(&self, ctx: &Context<'_>, user_id: ID) -> async_graphql::Result<User> {
        let user_id = parse_id(&user_id, "user")?;
        Ok(services(ctx)?.activate_user(session(ctx)?, user_id).gql()?.into())
    }

    /// Create or replace a role definition. `admin` is fixed.
    async fn upsert_role(&self, ctx: &Context<'_>, input: RoleInput) -> async_graphql::Result<Role> {
        let role = services(ctx)?
            .upsert_role(session(ctx)?, &input.name, input.description, input.permissions.0)
            .gql()?;
        Ok(role.into())
    }

    // ── customers ───────────────────────────────────────────────────────────

    async fn create_customer(&self, ctx: &Context<'_>, input: CustomerInput) -> async_graphql::Result<Customer> {
        let details = input.into_details().gql()?;
        Ok(services(ctx)?.create_customer(session(ctx)?, details).gql()?.into())
    }

    async fn update_customer(&self, ctx: &Context<'_>, id: ID, input: CustomerInput) -> async_graphql::Result<Customer> {
        let id = parse_id(&id, "customer")?;
        let details = input.into_details().gql()?;
        Ok(services(ctx)?.update_customer(session(ctx)?, id, details).gql()?.into())
    }

    async fn archive_customer(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Customer> {
        let id = parse_id(&id, "customer")?;
        Ok(services(ctx)?.archive_customer(session(ctx)?, id).gql()?.into())
    }

    async fn restore_customer(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Customer> {
        let id = parse_id(&id, "customer")?;
        Ok(services(ctx)?.restore_customer(session(ctx)?, id).gql()?.into())
    }

    // ── products ────────────────────────────────────────────────────────────

    async fn create_product(&self, ctx: &Context<'_>, input: ProductInput) -> async_graphql::Result<Product> {
        let details = input.into_details().gql()?;
        Ok(services(ctx)?.create_product(session(ctx)?, details).gql()?.into())
    }

    async fn update_product(&self, ctx: &Context<'_>, id: ID, input: ProductInput) -> async_graphql::Result<Product> {
        let id = parse_id(&id, "product")?;
        let details = input.into_details().gql()?;
        Ok(services(ctx)?.update_product(session(ctx)?, id, details).gql()?.into())
    }

    async fn archive_product(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Product> {
        let id = parse_id(&id, "product")?;
        Ok(services(ctx)?.archive_product(session(ctx)?, id).gql()?.into())
    }

    async fn restore_product(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Product> {
        let id = parse_id(&id, "product")?;
        Ok(services(ctx)?.restore_product(session(ctx)?, id).gql()?.into())
    }

    // ── contracts ───────────────────────────────────────────────────────────

    /// New contracts start as drafts.
    async fn create_contract(&self, ctx: &Context<'_>, input: ContractInput) -> async_graphql::Result<Contract> {
        let terms = input.into_terms().gql()?;
        Ok(services(ctx)?.create_contract(session(ctx)?, terms).gql()?.into())
    }

    /// Replace the terms of a draft.
    async fn revise_contract(&self, ctx: &Context<'_>, id: ID, input: ContractInput) -> async_graphql::Result<Contract> {
        let id = parse_id(&id, "contract")?;
        let terms = input.into_terms().gql()?;
        Ok(services(ctx)?.revise_contract(session(ctx)?, id, terms).gql()?.into())
    }

    async fn activate_contract(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Contract> {
        let id = parse_id(&id, "contract")?;
        Ok(services(ctx)?.activate_contract(session(ctx)?, id).gql()?.into())
    }

    async fn pause_contract(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Contract> {
        let id = parse_id(&id, "contract")?;
        Ok(services(ctx)?.pause_contract(session(ctx)?, id).gql()?.into())
    }

    async fn resume_contract(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Contract> {
        let id = parse_id(&id, "contract")?;
        Ok(services(ctx)?.resume_contract(session(ctx)?, id).gql()?.into())
    }

    /// Without `effectiveEnd` the contract ends as early as the notice period allows.
    async fn cancel_contract(
        &self,
        ctx: &Context<'_>,
        id: ID,
        notice_date: Option<NaiveDate>,
        effective_end: Option<NaiveDate>,
    ) -> async_graphql::Result<Contract> {
        let id = parse_id(&id, "contract")?;
        Ok(services(ctx)?
            .cancel_contract(session(ctx)?, id, notice_date, effective_end)
            .gql()?
            .into())
    }

    async fn end_contract(&self, ctx: &Context<'_>, id: ID, on: Option<NaiveDate>) -> async_graphql::Result<Contract> {
        let id = parse_id(&id, "contract")?;
        Ok(services(ctx)?.end_contract(session(ctx)?, id, on).gql()?.into())
    }

    // ── invoices ────────────────────────────────────────────────────────────

    async fn issue_invoice(&self, ctx: &Context<'_>, input: InvoiceInput) -> async_graphql::Result<Invoice> {
        let request = input.into_request().gql()?;
        Ok(services(ctx)?.issue_invoice(session(ctx)?, request).await.gql()?.into())
    }

    /// Invoice every unbilled period of the contract starting on or before `until`
    /// (default today).
    async fn bill_contract(
        &self,
        ctx: &Context<'_>,
        id: ID,
        until: Option<NaiveDate>,
    ) -> async_graphql::Result<Vec<Invoice>> {
        let id = parse_id(&id, "contract")?;
        let invoices = services(ctx)?.bill_contract(session(ctx)?, id, until).await.gql()?;
        Ok(invoices.into_iter().map(Into::into).collect())
    }

    /// Billing run over every running contract.
    async fn bill_due_contracts(&self, ctx: &Context<'_>, until: Option<NaiveDate>) -> async_graphql::Result<Vec<Invoice>> {
        let invoices = services(ctx)?.bill_due_contracts(session(ctx)?, until).await.gql()?;
        Ok(invoices.into_iter().map(Into::into).collect())
    }

    /// `currency` defaults to the invoice's.
    async fn register_payment(
        &self,
        ctx: &Context<'_>,
        id: ID,
        amount_cents: i64,
        currency: Option<String>,
        paid_on: Option<NaiveDate>,
    ) -> async_graphql::Result<Invoice> {
        let id = parse_id(&id, "invoice")?;
        let services = services(ctx)?;
        let session = session(ctx)?;
        let currency = match currency {
            Some(code) => code.parse::<Currency>().map_err(ApiError::from).gql()?,
            None => services.invoice(session, id).gql()?.currency(),
        };
        let amount = DomainMoney::new(amount_cents, currency);
        Ok(services.register_payment(session, id, amount, paid_on).gql()?.into())
    }

    async fn cancel_invoice(&self, ctx: &Context<'_>, id: ID, reason: Option<String>) -> async_graphql::Result<Invoice> {
        let id = parse_id(&id, "invoice")?;
        Ok(services(ctx)?.cancel_invoice(session(ctx)?, id, reason).gql()?.into())
    }

    /// Changing pattern or reset period keeps the counter unless `resetCounter` or
    /// `startAt` is given.
    async fn configure_number_scheme(
        &self,
        ctx: &Context<'_>,
        input: NumberSchemeInput,
    ) -> async_graphql::Result<NumberScheme> {
        let update = input.into_update().gql()?;
        Ok(services(ctx)?
            .configure_number_scheme(session(ctx)?, update)
            .await
            .gql()?
            .into())
    }

    // ── imported invoices ───────────────────────────────────────────────────

    /// Queue another extraction after a failure, or re-extract.
    async fn extract_imported_invoice(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<ImportedInvoice> {
        let id = parse_id(&id, "imported invoice")?;
        Ok(services(ctx)?.extract_imported_invoice(session(ctx)?, id).gql()?.into())
    }

    /// Confirm extracted data; given fields override what was extracted.
    async fn confirm_imported_invoice(
        &self,
        ctx: &Context<'_>,
        id: ID,
        #[graphql(default)] corrections: InvoiceDataInput,
        customer_id: Option<ID>,
    ) -> async_graphql::Result<ImportedInvoice> {
        let id = parse_id(&id, "imported invoice")?;
        let customer_id = parse_opt_id(customer_id.as_ref(), "customer")?;
        let corrections = InvoiceData::from(corrections);
        Ok(services(ctx)?
            .confirm_imported_invoice(session(ctx)?, id, corrections, customer_id)
            .gql()?
            .into())
    }

    // ── banking ─────────────────────────────────────────────────────────────

    async fn open_bank_account(&self, ctx: &Context<'_>, input: BankAccountInput) -> async_graphql::Result<BankAccount> {
        let details = input.into_details().gql()?;
        Ok(services(ctx)?.open_bank_account(session(ctx)?, details).gql()?.into())
    }

    async fn update_bank_account(
        &self,
        ctx: &Context<'_>,
        id: ID,
        input: BankAccountInput,
    ) -> async_graphql::Result<BankAccount> {
        let id = parse_id(&id, "bank account")?;
        let details = input.into_details().gql()?;
        Ok(services(ctx)?
            .update_bank_account(session(ctx)?, id, details)
            .gql()?
            .into())
    }

    /// Import MT940 text. Files go through `POST /api/bank-accounts/:id/statements`.
    async fn import_statement(
        &self,
        ctx: &Context<'_>,
        account_id: ID,
        content: String,
    ) -> async_graphql::Result<StatementImportResult> {
        let account_id = parse_id(&account_id, "bank account")?;
        let result = services(ctx)?
            .import_statement(session(ctx)?, account_id, content.as_bytes())
            .gql()?;
        Ok(result.into())
    }

    async fn detect_recurring_patterns(&self, ctx: &Context<'_>, account_id: ID) -> async_graphql::Result<Vec<RecurringPattern>> {
        let account_id = parse_id(&account_id, "bank account")?;
        let patterns = services(ctx)?.detect_recurring(session(ctx)?, account_id).gql()?;
        Ok(patterns.into_iter().map(Into::into).collect())
    }

    /// Confirm or ignore a suggested pattern. The decision survives re-detection.
    async fn set_pattern_status(
        &self,
        ctx: &Context<'_>,
        id: ID,
        status: PatternStatus,
    ) -> async_graphql::Result<RecurringPattern> {
        let id: Uuid = parse_id(&id, "pattern")?;
        Ok(services(ctx)?
            .set_pattern_status(session(ctx)?, id, status.into())
            .gql()?
            .into())
    }
}
