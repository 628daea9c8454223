use std::collections::HashMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use kontor_core::{Aggregate, AggregateId, TenantId};
use kontor_events::EventEnvelope;

use crate::read_model::TenantStore;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize {aggregate_type} event: {message}")]
    Deserialize { aggregate_type: String, message: String },

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// Read model of one aggregate type: the aggregate state folded from its envelopes.
///
/// Idempotent under at-least-once delivery: a per-stream cursor skips sequence numbers
/// already applied and rejects gaps.
pub struct AggregateProjection<A, S> {
    aggregate_type: &'static str,
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    make: fn(AggregateId) -> A,
}

impl<A, S> AggregateProjection<A, S>
where
    A: Aggregate + Clone,
    A::Event: DeserializeOwned,
    S: TenantStore<AggregateId, A>,
{
    pub fn new(aggregate_type: &'static str, store: S, make: fn(AggregateId) -> A) -> Self {
        Self {
            aggregate_type,
            store,
            cursors: RwLock::new(HashMap::new()),
            make,
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    pub fn get(&self, tenant_id: TenantId, id: AggregateId) -> Option<A> {
        self.store.get(tenant_id, &id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<A> {
        self.store.list(tenant_id)
    }

    pub fn list_where(&self, tenant_id: TenantId, keep: impl Fn(&A) -> bool) -> Vec<A> {
        self.store.list_where(tenant_id, &keep)
    }

    fn cursor(&self, key: CursorKey) -> u64 {
        self.cursors
            .read()
            .ok()
            .and_then(|c| c.get(&key).copied())
            .unwrap_or(0)
    }

    /// Returns `true` if the envelope changed the read model.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, ProjectionError> {
        if envelope.aggregate_type() != self.aggregate_type {
            return Ok(false);
        }

        let key = CursorKey {
            tenant_id: envelope.tenant_id(),
            aggregate_id: envelope.aggregate_id(),
        };
        let seq = envelope.sequence_number();
        let last = self.cursor(key);
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(false);
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: A::Event =
            serde_json::from_value(envelope.payload().clone()).map_err(|e| ProjectionError::Deserialize {
                aggregate_type: self.aggregate_type.to_string(),
                message: e.to_string(),
            })?;

        let mut state = self
            .store
            .get(key.tenant_id, &key.aggregate_id)
            .unwrap_or_else(|| (self.make)(key.aggregate_id));
        state.apply(&ev);
        self.store.upsert(key.tenant_id, key.aggregate_id, state);

        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(key, seq);
        }
        Ok(true)
    }

    /// Clear the tenants present in `envelopes` and replay them in stream order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let mut envs: Vec<_> = envelopes
            .into_iter()
            .filter(|e| e.aggregate_type() == self.aggregate_type)
            .collect();

        let mut tenants: Vec<TenantId> = envs.iter().map(|e| e.tenant_id()).collect();
        tenants.sort_by_key(|t| *t.as_uuid());
        tenants.dedup();
        for t in tenants {
            self.store.clear_tenant(t);
            if let Ok(mut cursors) = self.cursors.write() {
                cursors.retain(|k, _| k.tenant_id != t);
            }
        }

        envs.sort_by_key(|e| (*e.tenant_id().as_uuid(), *e.aggregate_id().as_uuid(), e.sequence_number()));
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use kontor_core::Money;
    use kontor_products::{BillingType, Product, ProductCommand, ProductDetails, ProductId, ProductStatus};

    use crate::read_model::InMemoryTenantStore;

    type Catalog = AggregateProjection<Product, Arc<InMemoryTenantStore<AggregateId, Product>>>;

    fn catalog() -> Catalog {
        AggregateProjection::new("products.product", Arc::new(InMemoryTenantStore::new()), |id| {
            Product::empty(ProductId::new(id))
        })
    }

    fn envelopes(tenant_id: TenantId, id: ProductId) -> Vec<EventEnvelope<JsonValue>> {
        let mut product = Product::empty(id);
        let commands = [
            ProductCommand::Create {
                tenant_id,
                product_id: id,
                details: ProductDetails {
                    sku: "SUP-1".into(),
                    name: "Support".into(),
                    description: None,
                    unit: "h".into(),
                    net_price: Money::eur(9_500),
                    tax_rate_bp: 1900,
                    billing_type: BillingType::OneTime,
                },
                occurred_at: Utc::now(),
            },
            ProductCommand::Archive {
                tenant_id,
                occurred_at: Utc::now(),
            },
        ];
        let mut out = Vec::new();
        for cmd in commands {
            for ev in product.handle(&cmd).unwrap() {
                product.apply(&ev);
                out.push(EventEnvelope::new(
                    Uuid::now_v7(),
                    tenant_id,
                    id.0,
                    "products.product".to_string(),
                    out.len() as u64 + 1,
                    "products.test".to_string(),
                    serde_json::to_value(&ev).unwrap(),
                ));
            }
        }
        out
    }

    #[test]
    fn folds_envelopes_and_skips_duplicates() {
        let p = catalog();
        let tenant = TenantId::new();
        let id = ProductId::generate();
        let envs = envelopes(tenant, id);

        for env in &envs {
            assert!(p.apply_envelope(env).unwrap());
        }
        assert!(!p.apply_envelope(&envs[0]).unwrap());

        let product = p.get(tenant, id.0).unwrap();
        assert_eq!(product.status(), ProductStatus::Archived);
        assert!(p.get(TenantId::new(), id.0).is_none());
    }

    #[test]
    fn gaps_are_rejected_and_foreign_types_ignored() {
        let p = catalog();
        let tenant = TenantId::new();
        let envs = envelopes(tenant, ProductId::generate());
        p.apply_envelope(&envs[0]).unwrap();

        let src = &envs[1];
        let gap = EventEnvelope::new(
            src.event_id(),
            src.tenant_id(),
            src.aggregate_id(),
            src.aggregate_type().to_string(),
            5,
            src.event_type().to_string(),
            src.payload().clone(),
        );
        assert!(matches!(
            p.apply_envelope(&gap),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 5 })
        ));

        let other = EventEnvelope::new(
            Uuid::now_v7(),
            tenant,
            AggregateId::new(),
            "customers.customer".to_string(),
            1,
            "x".to_string(),
            JsonValue::Null,
        );
        assert!(!p.apply_envelope(&other).unwrap());
    }

    #[test]
    fn rebuild_replaces_existing_state() {
        let p = catalog();
        let tenant = TenantId::new();
        let id = ProductId::generate();
        let envs = envelopes(tenant, id);
        p.apply_envelope(&envs[0]).unwrap();

        p.rebuild_from_scratch(envs.into_iter().rev()).unwrap();
        assert_eq!(p.list(tenant).len(), 1);
        assert_eq!(p.get(tenant, id.0).unwrap().status(), ProductStatus::Archived);
    }
}
