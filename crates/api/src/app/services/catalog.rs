//! Customers and products.

use chrono::Utc;

use kontor_auth::permissions::names;
use kontor_core::AggregateRoot;
use kontor_customers::{
    Customer, CustomerCommand, CustomerDetails, CustomerId, CustomerMatch, CustomerStatus, MatchCandidate, MatchQuery,
    find_matches,
};
use kontor_infra::projections::aggregate_types;
use kontor_infra::read_model::Scope;
use kontor_products::{Product, ProductCommand, ProductDetails, ProductId, ProductStatus};

use super::{AppServices, keys};
use crate::app::errors::ApiError;
use crate::context::Session;

impl AppServices {
    // ── customers ────────────────────────────────────────────────────────────

    /// Customers sorted by name; archived ones only on request.
    pub fn customers(&self, session: &Session, include_archived: bool) -> Result<Vec<Customer>, ApiError> {
        self.authorize(session, &names::CUSTOMERS_READ)?;
        let mut customers = self.projections.customers.list_where(session.tenant_id(), |c| {
            c.is_created() && (include_archived || c.status() == CustomerStatus::Active)
        });
        customers.sort_by(|a, b| a.details().name.cmp(&b.details().name));
        Ok(customers)
    }

    pub fn customer(&self, session: &Session, customer_id: CustomerId) -> Result<Customer, ApiError> {
        self.authorize(session, &names::CUSTOMERS_READ)?;
        self.customer_record(session, customer_id)
    }

    pub(super) fn customer_record(&self, session: &Session, customer_id: CustomerId) -> Result<Customer, ApiError> {
        self.projections
            .customers
            .get(session.tenant_id(), customer_id.aggregate_id())
            .filter(Customer::is_created)
            .ok_or_else(|| ApiError::not_found("customer"))
    }

    pub fn create_customer(&self, session: &Session, details: CustomerDetails) -> Result<Customer, ApiError> {
        self.authorize(session, &names::CUSTOMERS_WRITE)?;
        let tenant_id = session.tenant_id();
        let customer_id = CustomerId::generate();
        self.execute(
            tenant_id,
            Some(session.user_id()),
            customer_id.aggregate_id(),
            aggregate_types::CUSTOMER,
            CustomerCommand::Register {
                tenant_id,
                customer_id,
                details,
                occurred_at: Utc::now(),
            },
            |_, id| Customer::empty(CustomerId::new(id)),
        )
    }

    pub fn update_customer(
        &self,
        session: &Session,
        customer_id: CustomerId,
        details: CustomerDetails,
    ) -> Result<Customer, ApiError> {
        self.authorize(session, &names::CUSTOMERS_WRITE)?;
        let command = CustomerCommand::Update {
            tenant_id: session.tenant_id(),
            details,
            occurred_at: Utc::now(),
        };
        self.customer_command(session, customer_id, command)
    }

    pub fn archive_customer(&self, session: &Session, customer_id: CustomerId) -> Result<Customer, ApiError> {
        self.authorize(session, &names::CUSTOMERS_WRITE)?;
        let command = CustomerCommand::Archive {
            tenant_id: session.tenant_id(),
            occurred_at: Utc::now(),
        };
        self.customer_command(session, customer_id, command)
    }

    pub fn restore_customer(&self, session: &Session, customer_id: CustomerId) -> Result<Customer, ApiError> {
        self.authorize(session, &names::CUSTOMERS_WRITE)?;
        let command = CustomerCommand::Restore {
            tenant_id: session.tenant_id(),
            occurred_at: Utc::now(),
        };
        self.customer_command(session, customer_id, command)
    }

    fn customer_command(
        &self,
        session: &Session,
        customer_id: CustomerId,
        command: CustomerCommand,
    ) -> Result<Customer, ApiError> {
        self.customer_record(session, customer_id)?;
        self.execute(
            session.tenant_id(),
            Some(session.user_id()),
            customer_id.aggregate_id(),
            aggregate_types::CUSTOMER,
            command,
            |_, id| Customer::empty(CustomerId::new(id)),
        )
    }

    /// Fuzzy search over the tenant's active customers.
    pub fn match_customers(
        &self,
        session: &Session,
        query: &MatchQuery,
        threshold: Option<f64>,
    ) -> Result<Vec<CustomerMatch>, ApiError> {
        self.authorize(session, &names::CUSTOMERS_READ)?;
        let threshold = threshold.unwrap_or(kontor_customers::DEFAULT_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ApiError::validation("threshold must be between 0 and 1"));
        }
        Ok(find_matches(query, &self.match_candidates(session), threshold))
    }

    pub(super) fn match_candidates(&self, session: &Session) -> Vec<MatchCandidate> {
        self.projections
            .customers
            .list(session.tenant_id())
            .iter()
            .filter_map(Customer::match_candidate)
            .collect()
    }

    // ── products ─────────────────────────────────────────────────────────────

    pub fn products(&self, session: &Session, include_archived: bool) -> Result<Vec<Product>, ApiError> {
        self.authorize(session, &names::PRODUCTS_READ)?;
        let mut products: Vec<Product> = self
            .projections
            .products
            .list(session.tenant_id())
            .into_iter()
            .filter(|p| p.details().is_some() && (include_archived || p.status() == ProductStatus::Active))
            .collect();
        products.sort_by(|a, b| sku_of(a).cmp(sku_of(b)));
        Ok(products)
    }

    pub fn product(&self, session: &Session, product_id: ProductId) -> Result<Product, ApiError> {
        self.authorize(session, &names::PRODUCTS_READ)?;
        self.product_record(session, product_id)
    }

    pub(super) fn product_record(&self, session: &Session, product_id: ProductId) -> Result<Product, ApiError> {
        self.projections
            .products
            .get(session.tenant_id(), product_id.aggregate_id())
            .filter(|p| p.details().is_some())
            .ok_or_else(|| ApiError::not_found("product"))
    }

    /// SKUs are unique per tenant; the claim is taken before the command and dropped if it fails.
    pub fn create_product(&self, session: &Session, details: ProductDetails) -> Result<Product, ApiError> {
        self.authorize(session, &names::PRODUCTS_WRITE)?;
        let tenant_id = session.tenant_id();
        let product_id = ProductId::generate();
        let sku = normalize_sku(&details.sku);
        let scope = Scope::Tenant(tenant_id);
        self.unique
            .claim(scope, keys::PRODUCT_SKU, &sku, product_id.aggregate_id())
            .map_err(|_| ApiError::Conflict(format!("sku '{sku}' already exists")))?;

        let result = self.execute(
            tenant_id,
            Some(session.user_id()),
            product_id.aggregate_id(),
            aggregate_types::PRODUCT,
            ProductCommand::Create {
                tenant_id,
                product_id,
                details,
                occurred_at: Utc::now(),
            },
            |_, id| Product::empty(ProductId::new(id)),
        );
        if result.is_err() {
            self.unique.release(scope, keys::PRODUCT_SKU, &sku, product_id.aggregate_id());
        }
        result
    }

    pub fn update_product(
        &self,
        session: &Session,
        product_id: ProductId,
        details: ProductDetails,
    ) -> Result<Product, ApiError> {
        self.authorize(session, &names::PRODUCTS_WRITE)?;
        let current = self.product_record(session, product_id)?;
        let old_sku = sku_of(&current).to_string();
        let new_sku = normalize_sku(&details.sku);
        let scope = Scope::Tenant(session.tenant_id());
        let owner = product_id.aggregate_id();
        self.unique
            .rename(scope, keys::PRODUCT_SKU, &old_sku, &new_sku, owner)
            .map_err(|_| ApiError::Conflict(format!("sku '{new_sku}' already exists")))?;

        let command = ProductCommand::Update {
            tenant_id: session.tenant_id(),
            details,
            occurred_at: Utc::now(),
        };
        let result = self.product_command(session, product_id, command);
        if result.is_err() {
            if let Err(e) = self.unique.restore(scope, keys::PRODUCT_SKU, &new_sku, &old_sku, owner) {
                tracing::warn!(error = %e, product_id = %product_id, sku = %old_sku, "could not restore the SKU claim after a failed update");
            }
        }
        result
    }

    pub fn archive_product(&self, session: &Session, product_id: ProductId) -> Result<Product, ApiError> {
        self.authorize(session, &names::PRODUCTS_WRITE)?;
        let command = ProductCommand::Archive {
            tenant_id: session.tenant_id(),
            occurred_at: Utc::now(),
        };
        self.product_command(session, product_id, command)
    }

    pub fn restore_product(&self, session: &Session, product_id: ProductId) -> Result<Product, ApiError> {
        self.authorize(session, &names::PRODUCTS_WRITE)?;
        let command = ProductCommand::Restore {
            tenant_id: session.tenant_id(),
            occurred_at: Utc::now(),
        };
        self.product_command(session, product_id, command)
    }

    fn product_command(&self, session: &Session, product_id: ProductId, command: ProductCommand) -> Result<Product, ApiError> {
        let product = self.execute(
            session.tenant_id(),
            Some(session.user_id()),
            product_id.aggregate_id(),
            aggregate_types::PRODUCT,
            command,
            |_, id| Product::empty(ProductId::new(id)),
        )?;
        tracing::debug!(product_id = %product.id(), "product changed");
        Ok(product)
    }
}

fn normalize_sku(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn sku_of(product: &Product) -> &str {
    product.details().map(|d| d.sku.as_str()).unwrap_or_default()
}
