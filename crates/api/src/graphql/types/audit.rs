use async_graphql::{ID, Json, SimpleObject};
use chrono::{DateTime, Utc};

use kontor_audit::{AuditEntry as DomainEntry, Changes};

use crate::graphql::types::enums::AuditAction;

#[derive(SimpleObject)]
pub struct AuditEntry {
    pub id: ID,
    /// `null` for system actions.
    pub actor_id: Option<ID>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    /// `{"field.path": {"old": ..., "new": ...}}`.
    pub changes: Json<Changes>,
    pub recorded_at: DateTime<Utc>,
}

impl From<DomainEntry> for AuditEntry {
    fn from(entry: DomainEntry) -> Self {
        Self {
            id: ID(entry.id.to_string()),
            actor_id: entry.actor.map(|a| ID(a.to_string())),
            action: entry.action.into(),
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            changes: Json(entry.changes),
            recorded_at: entry.recorded_at,
        }
    }
}
