//! Uniqueness claims for natural keys (tenant slug, user email, SKU, IBAN, role name,
//! file content hash).
//!
//! Event-sourced aggregates cannot see each other, so uniqueness is a store concern: a
//! service claims the key before dispatching the command and releases it again if the
//! command fails.

use std::collections::HashMap;
use std::sync::Mutex;

use kontor_core::{AggregateId, TenantId};

use crate::error::StoreError;

/// Where a key must be unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Tenant(TenantId),
}

#[derive(Debug, Default)]
pub struct UniqueIndex {
    claims: Mutex<HashMap<(Scope, &'static str, String), AggregateId>>,
}

impl UniqueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` of `kind` for `owner`. Claiming a key one already owns is a no-op.
    pub fn claim(&self, scope: Scope, kind: &'static str, key: &str, owner: AggregateId) -> Result<(), StoreError> {
        let mut claims = self.claims.lock().map_err(|_| StoreError::poisoned())?;
        match claims.get(&(scope, kind, key.to_string())) {
            Some(existing) if *existing != owner => Err(StoreError::Duplicate(format!("{kind} '{key}' is already taken"))),
            Some(_) => Ok(()),
            None => {
                claims.insert((scope, kind, key.to_string()), owner);
                Ok(())
            }
        }
    }

    /// Release `key` if `owner` holds it.
    pub fn release(&self, scope: Scope, kind: &'static str, key: &str, owner: AggregateId) {
        if let Ok(mut claims) = self.claims.lock() {
            let k = (scope, kind, key.to_string());
            if claims.get(&k) == Some(&owner) {
                claims.remove(&k);
            }
        }
    }

    pub fn owner(&self, scope: Scope, kind: &'static str, key: &str) -> Option<AggregateId> {
        let claims = self.claims.lock().ok()?;
        claims.get(&(scope, kind, key.to_string())).copied()
    }

    /// Move a claim from `old_key` to `new_key` (e.g. a changed SKU).
    pub fn rename(
        &self,
        scope: Scope,
        kind: &'static str,
        old_key: &str,
        new_key: &str,
        owner: AggregateId,
    ) -> Result<(), StoreError> {
        if old_key == new_key {
            return Ok(());
        }
        self.claim(scope, kind, new_key, owner)?;
        self.release(scope, kind, old_key, owner);
        Ok(())
    }

    /// Undo [`rename`](Self::rename) after the command it guarded failed. `new_key` is always
    /// released; the error says `old_key` was taken by someone else in the meantime.
    pub fn restore(
        &self,
        scope: Scope,
        kind: &'static str,
        new_key: &str,
        old_key: &str,
        owner: AggregateId,
    ) -> Result<(), StoreError> {
        if old_key == new_key {
            return Ok(());
        }
        let reclaimed = if old_key.is_empty() { Ok(()) } else { self.claim(scope, kind, old_key, owner) };
        self.release(scope, kind, new_key, owner);
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique_within_their_scope_only() {
        let idx = UniqueIndex::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        let (a, b) = (AggregateId::new(), AggregateId::new());

        idx.claim(Scope::Tenant(t1), "sku", "P-1", a).unwrap();
        idx.claim(Scope::Tenant(t1), "sku", "P-1", a).unwrap();
        assert!(matches!(
            idx.claim(Scope::Tenant(t1), "sku", "P-1", b),
            Err(StoreError::Duplicate(_))
        ));
        idx.claim(Scope::Tenant(t2), "sku", "P-1", b).unwrap();

        idx.claim(Scope::Global, "slug", "acme", a).unwrap();
        assert!(idx.claim(Scope::Global, "slug", "acme", b).is_err());
    }

    #[test]
    fn release_and_rename_only_touch_the_owner() {
        let idx = UniqueIndex::new();
        let t = Scope::Tenant(TenantId::new());
        let (a, b) = (AggregateId::new(), AggregateId::new());

        idx.claim(t, "email", "x@example.com", a).unwrap();
        idx.release(t, "email", "x@example.com", b);
        assert_eq!(idx.owner(t, "email", "x@example.com"), Some(a));

        idx.rename(t, "email", "x@example.com", "y@example.com", a).unwrap();
        assert_eq!(idx.owner(t, "email", "x@example.com"), None);
        assert_eq!(idx.owner(t, "email", "y@example.com"), Some(a));
    }

    #[test]
    fn restore_releases_the_new_key_even_if_the_old_one_was_taken() {
        let idx = UniqueIndex::new();
        let t = Scope::Tenant(TenantId::new());
        let (a, b) = (AggregateId::new(), AggregateId::new());

        idx.claim(t, "sku", "OLD", a).unwrap();
        idx.rename(t, "sku", "OLD", "NEW", a).unwrap();
        idx.restore(t, "sku", "NEW", "OLD", a).unwrap();
        assert_eq!(idx.owner(t, "sku", "OLD"), Some(a));
        assert_eq!(idx.owner(t, "sku", "NEW"), None);

        idx.rename(t, "sku", "OLD", "NEW", a).unwrap();
        idx.claim(t, "sku", "OLD", b).unwrap();
        assert!(matches!(idx.restore(t, "sku", "NEW", "OLD", a), Err(StoreError::Duplicate(_))));
        assert_eq!(idx.owner(t, "sku", "OLD"), Some(b));
        assert_eq!(idx.owner(t, "sku", "NEW"), None);
    }
}
