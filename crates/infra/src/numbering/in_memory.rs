use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use kontor_core::TenantId;
use kontor_invoicing::{NumberScheme, SchemeUpdate};

use super::NumberSchemeStore;
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct InMemoryNumberSchemeStore {
    schemes: Mutex<HashMap<TenantId, NumberScheme>>,
}

impl InMemoryNumberSchemeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_scheme<T>(
        &self,
        tenant_id: TenantId,
        f: impl FnOnce(&mut NumberScheme) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut schemes = self.schemes.lock().map_err(|_| StoreError::poisoned())?;
        f(schemes.entry(tenant_id).or_default())
    }
}

#[async_trait]
impl NumberSchemeStore for InMemoryNumberSchemeStore {
    async fn scheme(&self, tenant_id: TenantId) -> Result<NumberScheme, StoreError> {
        self.with_scheme(tenant_id, |s| Ok(s.clone()))
    }

    async fn configure(&self, tenant_id: TenantId, update: SchemeUpdate) -> Result<NumberScheme, StoreError> {
        self.with_scheme(tenant_id, |s| {
            // Work on a copy so a rejected update leaves the scheme untouched.
            let mut next = s.clone();
            next.configure(update)?;
            *s = next.clone();
            Ok(next)
        })
    }

    async fn preview(&self, tenant_id: TenantId, date: NaiveDate) -> Result<String, StoreError> {
        self.with_scheme(tenant_id, |s| Ok(s.preview(date)?))
    }

    async fn allocate(&self, tenant_id: TenantId, date: NaiveDate) -> Result<String, StoreError> {
        let number = self.with_scheme(tenant_id, |s| Ok(s.allocate(date)?))?;
        tracing::debug!(tenant_id = %tenant_id, number = %number, "allocated invoice number");
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use kontor_invoicing::{NumberingError, ResetPeriod};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn allocation_is_per_tenant_and_resets_yearly() {
        let store = InMemoryNumberSchemeStore::new();
        let (a, b) = (TenantId::new(), TenantId::new());
        store
            .configure(
                a,
                SchemeUpdate {
                    pattern: Some("RE-{YYYY}-{NUMBER:4}".parse().unwrap()),
                    reset_period: Some(ResetPeriod::Yearly),
                    ..SchemeUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(store.allocate(a, d(2024, 12, 30)).await.unwrap(), "RE-2024-0001");
        assert_eq!(store.allocate(a, d(2024, 12, 31)).await.unwrap(), "RE-2024-0002");
        assert_eq!(store.preview(a, d(2025, 1, 2)).await.unwrap(), "RE-2025-0001");
        assert_eq!(store.allocate(a, d(2025, 1, 2)).await.unwrap(), "RE-2025-0001");
        assert_eq!(store.scheme(b).await.unwrap().counter, 0);
    }

    #[tokio::test]
    async fn backdated_allocation_is_rejected_and_rejected_configure_keeps_scheme() {
        let store = InMemoryNumberSchemeStore::new();
        let t = TenantId::new();
        store.allocate(t, d(2025, 2, 1)).await.unwrap();

        let err = store.allocate(t, d(2024, 12, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Numbering(NumberingError::Backdated { .. })));

        let before = store.scheme(t).await.unwrap();
        let err = store
            .configure(
                t,
                SchemeUpdate {
                    reset_period: Some(ResetPeriod::Monthly),
                    start_at: Some(0),
                    ..SchemeUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Numbering(NumberingError::InvalidStart)));
        assert_eq!(store.scheme(t).await.unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_never_repeat() {
        let store = Arc::new(InMemoryNumberSchemeStore::new());
        let t = TenantId::new();
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.allocate(t, d(2024, 6, 1)).await.unwrap() })
            })
            .collect();

        let mut seen = HashSet::new();
        for task in tasks {
            assert!(seen.insert(task.await.unwrap()));
        }
        assert_eq!(seen.len(), 64);
        assert_eq!(store.scheme(t).await.unwrap().counter, 64);
    }
}
