use async_graphql::{ID, Object, SimpleObject};

use kontor_core::AggregateRoot;
use kontor_customers::{Address as DomainAddress, Customer as DomainCustomer, CustomerMatch as DomainMatch};
use kontor_products::Product as DomainProduct;

use crate::graphql::types::Money;
use crate::graphql::types::enums::{BillingType, CustomerStatus, ProductStatus};

#[derive(Clone)]
pub struct Customer {
    pub inner: DomainCustomer,
}

impl From<DomainCustomer> for Customer {
    fn from(customer: DomainCustomer) -> Self {
        Self { inner: customer }
    }
}

#[Object]
impl Customer {
    async fn id(&self) -> ID {
        ID(self.inner.id().to_string())
    }

    async fn customer_number(&self) -> Option<&str> {
        self.inner.details().customer_number.as_deref()
    }

    async fn name(&self) -> &str {
        &self.inner.details().name
    }

    async fn email(&self) -> Option<&str> {
        self.inner.details().email.as_deref()
    }

    async fn phone(&self) -> Option<&str> {
        self.inner.details().phone.as_deref()
    }

    async fn address(&self) -> Address {
        Address::from(&self.inner.details().address)
    }

    async fn vat_id(&self) -> Option<&str> {
        self.inner.details().vat_id.as_deref()
    }

    /// Normalized (no spaces, uppercase).
    async fn iban(&self) -> Option<&str> {
        self.inner.details().iban.as_ref().map(|i| i.as_str())
    }

    async fn status(&self) -> CustomerStatus {
        self.inner.status().into()
    }
}

#[derive(SimpleObject)]
pub struct Address {
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl From<&DomainAddress> for Address {
    fn from(address: &DomainAddress) -> Self {
        Self {
            street: address.street.clone(),
            postal_code: address.postal_code.clone(),
            city: address.city.clone(),
            country: address.country.clone(),
        }
    }
}

/// A fuzzy-match hit, best first.
#[derive(SimpleObject)]
pub struct CustomerMatch {
    pub customer_id: ID,
    pub name: String,
    /// 0..=1; exact IBAN or VAT id matches score 1.
    pub score: f64,
}

impl From<DomainMatch> for CustomerMatch {
    fn from(m: DomainMatch) -> Self {
        Self {
            customer_id: ID(m.customer_id.to_string()),
            name: m.name,
            score: m.score,
        }
    }
}

#[derive(Clone)]
pub struct Product {
    pub inner: DomainProduct,
}

impl From<DomainProduct> for Product {
    fn from(product: DomainProduct) -> Self {
        Self { inner: product }
    }
}

#[Object]
impl Product {
    async fn id(&self) -> ID {
        ID(self.inner.id().to_string())
    }

    async fn sku(&self) -> Option<&str> {
        self.inner.details().map(|d| d.sku.as_str())
    }

    async fn name(&self) -> Option<&str> {
        self.inner.details().map(|d| d.name.as_str())
    }

    async fn description(&self) -> Option<&str> {
        self.inner.details().and_then(|d| d.description.as_deref())
    }

    async fn unit(&self) -> Option<&str> {
        self.inner.details().map(|d| d.unit.as_str())
    }

    async fn net_price(&self) -> Option<Money> {
        self.inner.details().map(|d| d.net_price.into())
    }

    /// Basis points; 1900 is 19 %.
    async fn tax_rate_bp(&self) -> Option<u32> {
        self.inner.details().map(|d| d.tax_rate_bp)
    }

    async fn billing_type(&self) -> Option<BillingType> {
        self.inner.details().map(|d| d.billing_type.into())
    }

    async fn status(&self) -> ProductStatus {
        self.inner.status().into()
    }
}
