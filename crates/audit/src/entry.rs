use chrono::{DateTime, Utc};
use kontor_core::{TenantId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::diff::{Changes, diff_snapshots};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Some(AuditAction::Create),
            "update" => Some(AuditAction::Update),
            "delete" => Some(AuditAction::Delete),
            _ => None,
        }
    }
}

/// One audit log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// `None` for system actions (jobs, bootstrap).
    pub actor: Option<UserId>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub changes: Changes,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Build an entry from before/after snapshots, or `None` if nothing changed.
    pub fn from_snapshots(
        tenant_id: TenantId,
        actor: Option<UserId>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        before: Option<&JsonValue>,
        after: Option<&JsonValue>,
        recorded_at: DateTime<Utc>,
    ) -> Option<Self> {
        let (action, changes) = diff_snapshots(before, after)?;
        Some(Self {
            id: Uuid::now_v7(),
            tenant_id,
            actor,
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            changes,
            recorded_at,
        })
    }
}

/// Filter for reading the audit trail of one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor: Option<UserId>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    pub fn for_entity(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    /// `from` is inclusive, `to` exclusive.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.entity_type
            .as_deref()
            .is_none_or(|t| t == entry.entity_type)
            && self
                .entity_id
                .as_deref()
                .is_none_or(|id| id == entry.entity_id)
            && self.actor.is_none_or(|a| entry.actor == Some(a))
            && self.action.is_none_or(|a| a == entry.action)
            && self.from.is_none_or(|from| entry.recorded_at >= from)
            && self.to.is_none_or(|to| entry.recorded_at < to)
    }

    /// Filter, order newest first and page an in-memory list of entries.
    pub fn apply<'a, I>(&self, entries: I) -> Vec<AuditEntry>
    where
        I: IntoIterator<Item = &'a AuditEntry>,
    {
        let mut hits: Vec<AuditEntry> = entries
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(b.id.cmp(&a.id)));
        hits.into_iter()
            .skip(self.offset)
            .take(self.effective_limit())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entry(tenant: TenantId, actor: Option<UserId>, at: DateTime<Utc>, name: &str) -> AuditEntry {
        AuditEntry::from_snapshots(
            tenant,
            actor,
            "customer",
            "c-1",
            Some(&json!({"name": "before"})),
            Some(&json!({"name": name})),
            at,
        )
        .unwrap()
    }

    #[test]
    fn unchanged_snapshots_produce_no_entry() {
        let snap = json!({"name": "Acme"});
        let e = AuditEntry::from_snapshots(
            TenantId::new(),
            None,
            "customer",
            "c-1",
            Some(&snap),
            Some(&snap),
            Utc::now(),
        );
        assert!(e.is_none());
    }

    #[test]
    fn query_orders_newest_first_and_pages() {
        let tenant = TenantId::new();
        let t0 = Utc::now();
        let entries: Vec<_> = (0..5)
            .map(|i| entry(tenant, None, t0 + Duration::seconds(i), &format!("n{i}")))
            .collect();

        let q = AuditQuery {
            limit: Some(2),
            offset: 1,
            ..AuditQuery::for_entity("customer", "c-1")
        };
        let page = q.apply(&entries);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].changes["name"].new, json!("n3"));
        assert_eq!(page[1].changes["name"].new, json!("n2"));
    }

    #[test]
    fn query_filters_by_actor_and_time_range() {
        let tenant = TenantId::new();
        let alice = UserId::new();
        let t0 = Utc::now();
        let entries = vec![
            entry(tenant, Some(alice), t0, "a"),
            entry(tenant, None, t0 + Duration::seconds(1), "b"),
            entry(tenant, Some(alice), t0 + Duration::seconds(10), "c"),
        ];

        let q = AuditQuery {
            actor: Some(alice),
            to: Some(t0 + Duration::seconds(5)),
            ..AuditQuery::default()
        };
        let hits = q.apply(&entries);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].changes["name"].new, json!("a"));
    }
}
