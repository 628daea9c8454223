use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;

use kontor_audit::{AuditAction, AuditEntry, AuditQuery, Changes};
use kontor_core::{TenantId, UserId};

use super::{AuditLog, AuditSink};
use crate::error::{StoreError, map_sqlx_error};

/// Inserts per entry before it is dead-lettered.
const MAX_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Audit log in the `audit_log` table.
///
/// `record` only enqueues; a writer task owned by the store inserts the rows, so an entry
/// becomes visible to `query` shortly after the command returned. Failed inserts are retried
/// with a linear backoff. Entries that still fail are logged in full and kept as dead letters
/// until [`AuditLog::flush`] drains the queue on shutdown.
#[derive(Debug, Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<AuditEntry>>>>,
    writer: Arc<Mutex<Option<JoinHandle<Vec<AuditEntry>>>>>,
}

impl PostgresAuditLog {
    /// Must be called inside a tokio runtime (spawns the writer task).
    pub fn new(pool: PgPool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<AuditEntry>();
        let writer_pool = pool.clone();
        let writer = tokio::spawn(write_entries(rx, RETRY_BACKOFF, move |entry| {
            let pool = writer_pool.clone();
            async move { insert_entry(&pool, &entry).await }
        }));
        Self {
            pool,
            tx: Arc::new(Mutex::new(Some(tx))),
            writer: Arc::new(Mutex::new(Some(writer))),
        }
    }
}

/// Writer loop: insert every queued entry until the channel closes, returning the
/// entries that could not be stored.
async fn write_entries<F, Fut>(
    mut rx: mpsc::UnboundedReceiver<AuditEntry>,
    backoff: Duration,
    insert: F,
) -> Vec<AuditEntry>
where
    F: Fn(AuditEntry) -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let mut dead_letters = Vec::new();
    while let Some(entry) = rx.recv().await {
        let mut attempt = 1;
        loop {
            match insert(entry.clone()).await {
                Ok(()) => break,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(error = %e, entry_id = %entry.id, attempt, "audit insert failed; retrying");
                    tokio::time::sleep(backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    let payload = serde_json::to_string(&entry).unwrap_or_default();
                    tracing::error!(
                        error = %e,
                        entry_id = %entry.id,
                        entry = %payload,
                        "audit entry dead-lettered after {MAX_ATTEMPTS} attempts"
                    );
                    dead_letters.push(entry);
                    break;
                }
            }
        }
    }
    dead_letters
}

async fn insert_entry(pool: &PgPool, entry: &AuditEntry) -> Result<(), StoreError> {
    let changes = serde_json::to_value(&entry.changes).map_err(|e| StoreError::Database {
        operation: "insert_audit_entry".to_string(),
        message: e.to_string(),
    })?;
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, tenant_id, actor_id, action, entity_type, entity_id, changes, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.tenant_id.as_uuid())
    .bind(entry.actor.map(|a| *a.as_uuid()))
    .bind(entry.action.as_str())
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(changes)
    .bind(entry.recorded_at)
    .execute(pool)
    .await
    .map_err(|e| map_sqlx_error("insert_audit_entry", e))?;
    Ok(())
}

impl AuditSink for PostgresAuditLog {
    fn record(&self, entry: AuditEntry) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let sent = match tx.as_ref() {
            Some(tx) => tx.send(entry).map_err(|e| e.0),
            None => Err(entry),
        };
        if let Err(entry) = sent {
            let payload = serde_json::to_string(&entry).unwrap_or_default();
            tracing::error!(entry_id = %entry.id, entry = %payload, "audit writer has stopped; entry dropped");
        }
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    #[instrument(skip(self, query), fields(tenant_id = %tenant_id))]
    async fn query(&self, tenant_id: TenantId, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, tenant_id, actor_id, action, entity_type, entity_id, changes, recorded_at \
             FROM audit_log WHERE tenant_id = ",
        );
        qb.push_bind(*tenant_id.as_uuid());
        if let Some(t) = &query.entity_type {
            qb.push(" AND entity_type = ").push_bind(t.clone());
        }
        if let Some(id) = &query.entity_id {
            qb.push(" AND entity_id = ").push_bind(id.clone());
        }
        if let Some(actor) = query.actor {
            qb.push(" AND actor_id = ").push_bind(*actor.as_uuid());
        }
        if let Some(action) = query.action {
            qb.push(" AND action = ").push_bind(action.as_str());
        }
        if let Some(from) = query.from {
            qb.push(" AND recorded_at >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            qb.push(" AND recorded_at < ").push_bind(to);
        }
        qb.push(" ORDER BY recorded_at DESC, id DESC LIMIT ")
            .push_bind(query.effective_limit() as i64)
            .push(" OFFSET ")
            .push_bind(query.offset as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_audit_log", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn flush(&self) -> Vec<AuditEntry> {
        // Dropping the only sender lets the writer finish the queue and return.
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        match writer {
            Some(writer) => writer.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "audit writer task panicked");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<AuditEntry, StoreError> {
    let column = |e: sqlx::Error| map_sqlx_error("read_audit_entry", e);
    let action: String = row.try_get("action").map_err(column)?;
    let changes: serde_json::Value = row.try_get("changes").map_err(column)?;
    let changes: Changes = serde_json::from_value(changes).map_err(|e| StoreError::Database {
        operation: "read_audit_entry".to_string(),
        message: e.to_string(),
    })?;
    let actor: Option<uuid::Uuid> = row.try_get("actor_id").map_err(column)?;
    let tenant: uuid::Uuid = row.try_get("tenant_id").map_err(column)?;

    Ok(AuditEntry {
        id: row.try_get("id").map_err(column)?,
        tenant_id: TenantId::from_uuid(tenant),
        actor: actor.map(UserId::from_uuid),
        action: AuditAction::parse(&action).ok_or_else(|| StoreError::Database {
            operation: "read_audit_entry".to_string(),
            message: format!("unknown audit action '{action}'"),
        })?,
        entity_type: row.try_get("entity_type").map_err(column)?,
        entity_id: row.try_get("entity_id").map_err(column)?,
        changes,
        recorded_at: row.try_get("recorded_at").map_err(column)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn entry(entity_id: &str) -> AuditEntry {
        AuditEntry {
            id: uuid::Uuid::now_v7(),
            tenant_id: TenantId::new(),
            actor: None,
            action: AuditAction::Create,
            entity_type: "Customer".to_string(),
            entity_id: entity_id.to_string(),
            changes: Changes::default(),
            recorded_at: chrono::Utc::now(),
        }
    }

    fn db_down() -> StoreError {
        StoreError::Database {
            operation: "insert_audit_entry".to_string(),
            message: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_the_queue_is_drained() {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicU32::new(0));
        let stored = Arc::new(Mutex::new(Vec::new()));
        let (c, st) = (calls.clone(), stored.clone());
        let writer = tokio::spawn(write_entries(rx, Duration::ZERO, move |entry: AuditEntry| {
            let (c, st) = (c.clone(), st.clone());
            async move {
                // The first two inserts fail.
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(db_down());
                }
                st.lock().unwrap().push(entry.entity_id);
                Ok(())
            }
        }));

        for id in ["a", "b", "c"] {
            tx.send(entry(id)).unwrap();
        }
        drop(tx);

        let dead = writer.await.unwrap();
        assert!(dead.is_empty());
        assert_eq!(*stored.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn persistent_failures_are_dead_lettered() {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let writer = tokio::spawn(write_entries(rx, Duration::ZERO, move |entry: AuditEntry| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if entry.entity_id == "poison" { Err(db_down()) } else { Ok(()) }
            }
        }));

        tx.send(entry("ok")).unwrap();
        tx.send(entry("poison")).unwrap();
        tx.send(entry("ok-too")).unwrap();
        drop(tx);

        let dead = writer.await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].entity_id, "poison");
        assert_eq!(calls.load(Ordering::SeqCst), 2 + MAX_ATTEMPTS);
    }
}
