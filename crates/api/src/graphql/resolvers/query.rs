use async_graphql::{Context, ID, Object};
use chrono::NaiveDate;

use crate::graphql::inputs::{AuditQueryInput, CustomerMatchInput, ForecastInput};
use crate::graphql::types::enums::{ContractStatus, ImportStatus, InvoiceStatus, PatternStatus};
use crate::graphql::types::{
    AuditEntry, AuthError, BankAccount, BankTransaction, Contract, Customer, CustomerMatch, ImportedInvoice, Invoice,
    LiquidityForecast, MeResult, NumberScheme, Product, RecurringPattern, Role, Tenant, User, Viewer,
};
use crate::graphql::{GqlResultExt, parse_id, parse_opt_id, services, session};

/// Root query object.
pub struct Query;

#[Object]
impl Query {
    /// The caller's user and tenant, or why there is none.
    async fn me(&self, ctx: &Context<'_>) -> async_graphql::Result<MeResult> {
        let result = match services(ctx)?.me(ctx.data_opt()) {
            Ok((tenant, user)) => MeResult::Viewer(Viewer {
                tenant: tenant.into(),
                user: user.into(),
            }),
            Err(failure) => MeResult::Error(AuthError::from(failure)),
        };
        Ok(result)
    }

    async fn tenant(&self, ctx: &Context<'_>) -> async_graphql::Result<Tenant> {
        Ok(services(ctx)?.tenant(session(ctx)?).gql()?.into())
    }

    // ── users & roles ───────────────────────────────────────────────────────

    async fn users(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<User>> {
        let users = services(ctx)?.users(session(ctx)?).gql()?;
        Ok(users.into_iter().map(Into::into).collect())
    }

    async fn user(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<User> {
        let id = parse_id(&id, "user")?;
        Ok(services(ctx)?.user(session(ctx)?, id).gql()?.into())
    }

    async fn roles(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<Role>> {
        let roles = services(ctx)?.roles(session(ctx)?).gql()?;
        Ok(roles.into_iter().map(Into::into).collect())
    }

    // ── customers & products ────────────────────────────────────────────────

    async fn customers(
        &self,
        ctx: &Context<'_>,
        #[graphql(default)] include_archived: bool,
    ) -> async_graphql::Result<Vec<Customer>> {
        let customers = services(ctx)?.customers(session(ctx)?, include_archived).gql()?;
        Ok(customers.into_iter().map(Into::into).collect())
    }

    async fn customer(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Customer> {
        let id = parse_id(&id, "customer")?;
        Ok(services(ctx)?.customer(session(ctx)?, id).gql()?.into())
    }

    /// Fuzzy search by name, IBAN or VAT id; best match first.
    async fn match_customers(
        &self,
        ctx: &Context<'_>,
        query: CustomerMatchInput,
        threshold: Option<f64>,
    ) -> async_graphql::Result<Vec<CustomerMatch>> {
        let matches = services(ctx)?
            .match_customers(session(ctx)?, &query.into(), threshold)
            .gql()?;
        Ok(matches.into_iter().map(Into::into).collect())
    }

    async fn products(
        &self,
        ctx: &Context<'_>,
        #[graphql(default)] include_archived: bool,
    ) -> async_graphql::Result<Vec<Product>> {
        let products = services(ctx)?.products(session(ctx)?, include_archived).gql()?;
        Ok(products.into_iter().map(Into::into).collect())
    }

    async fn product(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Product> {
        let id = parse_id(&id, "product")?;
        Ok(services(ctx)?.product(session(ctx)?, id).gql()?.into())
    }

    // ── contracts & invoices ────────────────────────────────────────────────

    async fn contracts(&self, ctx: &Context<'_>, status: Option<ContractStatus>) -> async_graphql::Result<Vec<Contract>> {
        let contracts = services(ctx)?
            .contracts(session(ctx)?, status.map(Into::into))
            .gql()?;
        Ok(contracts.into_iter().map(Into::into).collect())
    }

    async fn contract(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Contract> {
        let id = parse_id(&id, "contract")?;
        Ok(services(ctx)?.contract(session(ctx)?, id).gql()?.into())
    }

    /// Newest first.
    async fn invoices(
        &self,
        ctx: &Context<'_>,
        status: Option<InvoiceStatus>,
        customer_id: Option<ID>,
    ) -> async_graphql::Result<Vec<Invoice>> {
        let customer_id = parse_opt_id(customer_id.as_ref(), "customer")?;
        let invoices = services(ctx)?
            .invoices(session(ctx)?, status.map(Into::into), customer_id)
            .gql()?;
        Ok(invoices.into_iter().map(Into::into).collect())
    }

    async fn invoice(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Invoice> {
        let id = parse_id(&id, "invoice")?;
        Ok(services(ctx)?.invoice(session(ctx)?, id).gql()?.into())
    }

    async fn number_scheme(&self, ctx: &Context<'_>) -> async_graphql::Result<NumberScheme> {
        Ok(services(ctx)?.number_scheme(session(ctx)?).await.gql()?.into())
    }

    /// The number the next invoice issued on `date` would get.
    async fn preview_invoice_number(&self, ctx: &Context<'_>, date: Option<NaiveDate>) -> async_graphql::Result<String> {
        services(ctx)?.preview_invoice_number(session(ctx)?, date).await.gql()
    }

    // ── imported invoices ───────────────────────────────────────────────────

    async fn imported_invoices(
        &self,
        ctx: &Context<'_>,
        status: Option<ImportStatus>,
    ) -> async_graphql::Result<Vec<ImportedInvoice>> {
        let records = services(ctx)?
            .imported_invoices(session(ctx)?, status.map(Into::into))
            .gql()?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    async fn imported_invoice(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<ImportedInvoice> {
        let id = parse_id(&id, "imported invoice")?;
        Ok(services(ctx)?.imported_invoice(session(ctx)?, id).gql()?.into())
    }

    // ── banking ─────────────────────────────────────────────────────────────

    async fn bank_accounts(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<BankAccount>> {
        let accounts = services(ctx)?.bank_accounts(session(ctx)?).gql()?;
        Ok(accounts.into_iter().map(Into::into).collect())
    }

    async fn bank_account(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<BankAccount> {
        let id = parse_id(&id, "bank account")?;
        Ok(services(ctx)?.bank_account(session(ctx)?, id).gql()?.into())
    }

    async fn bank_transactions(
        &self,
        ctx: &Context<'_>,
        account_id: ID,
        #[graphql(default = 100)] limit: u32,
        #[graphql(default)] offset: u32,
    ) -> async_graphql::Result<Vec<BankTransaction>> {
        let account_id = parse_id(&account_id, "bank account")?;
        let transactions = services(ctx)?
            .bank_transactions(session(ctx)?, account_id, limit as usize, offset as usize)
            .gql()?;
        Ok(transactions.into_iter().map(Into::into).collect())
    }

    async fn recurring_patterns(
        &self,
        ctx: &Context<'_>,
        account_id: Option<ID>,
        status: Option<PatternStatus>,
    ) -> async_graphql::Result<Vec<RecurringPattern>> {
        let account_id = parse_opt_id(account_id.as_ref(), "bank account")?;
        let patterns = services(ctx)?
            .recurring_patterns(session(ctx)?, account_id, status.map(Into::into))
            .gql()?;
        Ok(patterns.into_iter().map(Into::into).collect())
    }

    async fn liquidity_forecast(
        &self,
        ctx: &Context<'_>,
        #[graphql(default)] input: ForecastInput,
    ) -> async_graphql::Result<LiquidityForecast> {
        let forecast = services(ctx)?
            .liquidity_forecast(session(ctx)?, input.into())
            .gql()?;
        Ok(forecast.into())
    }

    // ── audit ───────────────────────────────────────────────────────────────

    /// Newest first; 50 entries unless `limit` says otherwise.
    async fn audit_log(
        &self,
        ctx: &Context<'_>,
        #[graphql(default)] query: AuditQueryInput,
    ) -> async_graphql::Result<Vec<AuditEntry>> {
        let query = query.into_query().gql()?;
        let entries = services(ctx)?.audit_log(session(ctx)?, query).await.gql()?;
        Ok(entries.into_iter().map(Into::into).collect())
    }
}
