//! Audit log storage.
//!
//! Writing is synchronous and infallible from the caller's point of view: the command
//! dispatcher hands every entry to an [`AuditSink`] after the events were appended, and a
//! failing sink must not fail the command. Reading goes through [`AuditLog`].

mod in_memory;
mod postgres;

use async_trait::async_trait;

use kontor_audit::{AuditEntry, AuditQuery};
use kontor_core::TenantId;

use crate::error::StoreError;

pub use in_memory::InMemoryAuditLog;
pub use postgres::PostgresAuditLog;

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Entries of one tenant matching `query`, newest first.
    async fn query(&self, tenant_id: TenantId, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError>;

    /// Finish pending writes and stop accepting new ones. Returns the entries that could
    /// not be stored. Stores that write synchronously have nothing to flush.
    async fn flush(&self) -> Vec<AuditEntry> {
        Vec::new()
    }
}

/// Sink that drops everything (tests, tools).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _entry: AuditEntry) {}
}
