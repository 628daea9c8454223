//! Per-tenant invoice number schemes and serialized number allocation.
//!
//! Allocation must never hand out the same number twice for a tenant, so every
//! implementation serializes `allocate` per tenant: the in-memory store behind a mutex,
//! the Postgres store with a row lock on the scheme inside a transaction.

mod in_memory;
mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;

use kontor_core::TenantId;
use kontor_invoicing::{NumberScheme, SchemeUpdate};

use crate::error::StoreError;

pub use in_memory::InMemoryNumberSchemeStore;
pub use postgres::PostgresNumberSchemeStore;

#[async_trait]
pub trait NumberSchemeStore: Send + Sync {
    /// Current scheme; tenants without one get the default scheme.
    async fn scheme(&self, tenant_id: TenantId) -> Result<NumberScheme, StoreError>;

    async fn configure(&self, tenant_id: TenantId, update: SchemeUpdate) -> Result<NumberScheme, StoreError>;

    /// The number `allocate` would return for `date`, without consuming it.
    async fn preview(&self, tenant_id: TenantId, date: NaiveDate) -> Result<String, StoreError>;

    async fn allocate(&self, tenant_id: TenantId, date: NaiveDate) -> Result<String, StoreError>;
}
