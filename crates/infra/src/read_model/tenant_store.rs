use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use kontor_core::TenantId;

/// Read-model storage partitioned by tenant. Nothing here is authoritative; every
/// record can be rebuilt from the event streams.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    fn list(&self, tenant_id: TenantId) -> Vec<V>;

    /// Records of one tenant matching `keep`, unordered.
    fn list_where(&self, tenant_id: TenantId, keep: &dyn Fn(&V) -> bool) -> Vec<V> {
        self.list(tenant_id).into_iter().filter(|v| keep(v)).collect()
    }

    fn clear_tenant(&self, tenant_id: TenantId);
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn list_where(&self, tenant_id: TenantId, keep: &dyn Fn(&V) -> bool) -> Vec<V> {
        (**self).list_where(tenant_id, keep)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

/// Tenant first, then key, so a listing only ever touches one tenant's records.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    tenants: RwLock<HashMap<TenantId, HashMap<K, V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let tenants = self.tenants.read().ok()?;
        tenants.get(&tenant_id)?.get(key).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.entry(tenant_id).or_default().insert(key, value);
        }
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        self.list_where(tenant_id, &|_| true)
    }

    // Filters before cloning.
    fn list_where(&self, tenant_id: TenantId, keep: &dyn Fn(&V) -> bool) -> Vec<V> {
        let Ok(tenants) = self.tenants.read() else {
            return Vec::new();
        };
        tenants
            .get(&tenant_id)
            .map(|records| records.values().filter(|v| keep(v)).cloned().collect())
            .unwrap_or_default()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.remove(&tenant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenants_never_see_each_other() {
        let store: InMemoryTenantStore<u32, &str> = InMemoryTenantStore::new();
        let (a, b) = (TenantId::new(), TenantId::new());
        store.upsert(a, 1, "a1");
        store.upsert(b, 1, "b1");
        store.upsert(a, 1, "a1'");

        assert_eq!(store.get(a, &1), Some("a1'"));
        assert_eq!(store.get(b, &1), Some("b1"));
        assert_eq!(store.list(a), vec!["a1'"]);

        store.clear_tenant(a);
        assert!(store.list(a).is_empty());
        assert_eq!(store.list(b).len(), 1);
    }

    #[test]
    fn list_where_filters_within_one_tenant() {
        let store: InMemoryTenantStore<u32, u32> = InMemoryTenantStore::new();
        let (a, b) = (TenantId::new(), TenantId::new());
        for n in 0..6 {
            store.upsert(a, n, n);
        }
        store.upsert(b, 100, 100);

        let mut even = store.list_where(a, &|v| v % 2 == 0);
        even.sort();
        assert_eq!(even, vec![0, 2, 4]);
        assert!(store.list_where(b, &|v| v % 2 == 1).is_empty());
        assert!(store.list_where(TenantId::new(), &|_| true).is_empty());
    }
}
