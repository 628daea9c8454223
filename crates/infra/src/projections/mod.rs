//! Read models built from the event stream.
//!
//! Every aggregate type has one [`AggregateProjection`] whose read model is the folded
//! aggregate itself. [`Projections`] routes envelopes to the right projection by
//! aggregate type. Projections are rebuildable, tenant-isolated and idempotent.

pub mod aggregate;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use kontor_auth::{Tenant, User};
use kontor_banking::{BankAccount, BankAccountId};
use kontor_contracts::{Contract, ContractId};
use kontor_core::AggregateId;
use kontor_customers::{Customer, CustomerId};
use kontor_events::EventEnvelope;
use kontor_invoicing::{ImportedInvoice, ImportedInvoiceId, Invoice, InvoiceId};
use kontor_products::{Product, ProductId};

use crate::event_store::StoredEvent;
use crate::read_model::InMemoryTenantStore;

pub use aggregate::{AggregateProjection, ProjectionError};

/// Stream names of the event-sourced aggregates.
pub mod aggregate_types {
    pub const TENANT: &str = "auth.tenant";
    pub const USER: &str = "auth.user";
    pub const CUSTOMER: &str = "customers.customer";
    pub const PRODUCT: &str = "products.product";
    pub const CONTRACT: &str = "contracts.contract";
    pub const INVOICE: &str = "invoicing.invoice";
    pub const IMPORTED_INVOICE: &str = "invoicing.imported_invoice";
    pub const BANK_ACCOUNT: &str = "banking.account";
}

type Store<A> = Arc<InMemoryTenantStore<AggregateId, A>>;
pub type Projection<A> = AggregateProjection<A, Store<A>>;

pub struct Projections {
    pub tenants: Projection<Tenant>,
    pub users: Projection<User>,
    pub customers: Projection<Customer>,
    pub products: Projection<Product>,
    pub contracts: Projection<Contract>,
    pub invoices: Projection<Invoice>,
    pub imported_invoices: Projection<ImportedInvoice>,
    pub bank_accounts: Projection<BankAccount>,
}

impl Projections {
    pub fn in_memory() -> Self {
        use aggregate_types::*;
        Self {
            tenants: AggregateProjection::new(TENANT, Store::default(), |id| Tenant::empty(id.into())),
            users: AggregateProjection::new(USER, Store::default(), |id| User::empty(id.into())),
            customers: AggregateProjection::new(CUSTOMER, Store::default(), |id| Customer::empty(CustomerId::new(id))),
            products: AggregateProjection::new(PRODUCT, Store::default(), |id| Product::empty(ProductId::new(id))),
            contracts: AggregateProjection::new(CONTRACT, Store::default(), |id| Contract::empty(ContractId::new(id))),
            invoices: AggregateProjection::new(INVOICE, Store::default(), |id| Invoice::empty(InvoiceId::new(id))),
            imported_invoices: AggregateProjection::new(IMPORTED_INVOICE, Store::default(), |id| {
                ImportedInvoice::empty(ImportedInvoiceId::new(id))
            }),
            bank_accounts: AggregateProjection::new(BANK_ACCOUNT, Store::default(), |id| {
                BankAccount::empty(BankAccountId::new(id))
            }),
        }
    }

    /// Route one envelope; unknown aggregate types are ignored.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, ProjectionError> {
        use aggregate_types::*;
        match envelope.aggregate_type() {
            TENANT => self.tenants.apply_envelope(envelope),
            USER => self.users.apply_envelope(envelope),
            CUSTOMER => self.customers.apply_envelope(envelope),
            PRODUCT => self.products.apply_envelope(envelope),
            CONTRACT => self.contracts.apply_envelope(envelope),
            INVOICE => self.invoices.apply_envelope(envelope),
            IMPORTED_INVOICE => self.imported_invoices.apply_envelope(envelope),
            BANK_ACCOUNT => self.bank_accounts.apply_envelope(envelope),
            _ => Ok(false),
        }
    }

    /// Apply freshly committed events (read-your-writes after a dispatch).
    pub fn apply(&self, events: &[StoredEvent]) {
        for stored in events {
            if let Err(e) = self.apply_envelope(&stored.to_envelope()) {
                tracing::warn!(error = %e, aggregate_type = %stored.aggregate_type, "projection apply failed");
            }
        }
    }
}

impl Default for Projections {
    fn default() -> Self {
        Self::in_memory()
    }
}
