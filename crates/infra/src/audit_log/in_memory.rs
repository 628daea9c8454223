use std::sync::RwLock;

use async_trait::async_trait;

use kontor_audit::{AuditEntry, AuditQuery};
use kontor_core::TenantId;

use super::{AuditLog, AuditSink};
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) {
        match self.entries.write() {
            Ok(mut entries) => entries.push(entry),
            Err(_) => tracing::error!(entity_type = %entry.entity_type, "audit log lock poisoned; entry dropped"),
        }
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn query(&self, tenant_id: TenantId, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::poisoned())?;
        Ok(query.apply(entries.iter().filter(|e| e.tenant_id == tenant_id)))
    }
}
