//! Tenant-isolated read model storage and uniqueness claims.

pub mod tenant_store;
pub mod unique_index;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
pub use unique_index::{Scope, UniqueIndex};
