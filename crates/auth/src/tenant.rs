//! Tenant aggregate: the isolation boundary every other record hangs off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use kontor_core::{Aggregate, AggregateRoot, Auditable, DomainError, TenantId};
use kontor_events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
}

#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub slug: String,
    pub status: TenantStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created: bool,
}

impl Tenant {
    pub fn empty(id: TenantId) -> Self {
        Self {
            id,
            name: String::new(),
            slug: String::new(),
            status: TenantStatus::Active,
            created_at: None,
            version: 0,
            created: false,
        }
    }
}

impl AggregateRoot for Tenant {
    type Id = TenantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Normalize and validate a tenant slug (`[a-z0-9-]{2,63}`, no leading/trailing dash).
pub fn normalize_slug(raw: &str) -> Result<String, DomainError> {
    let slug = raw.trim().to_lowercase();
    let valid_chars = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !(2..=63).contains(&slug.len())
        || !valid_chars
        || slug.starts_with('-')
        || slug.ends_with('-')
    {
        return Err(DomainError::validation(format!("invalid tenant slug '{raw}'")));
    }
    Ok(slug)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TenantCommand {
    Create {
        tenant_id: TenantId,
        name: String,
        slug: String,
        occurred_at: DateTime<Utc>,
    },
    Rename {
        name: String,
        occurred_at: DateTime<Utc>,
    },
    Suspend {
        occurred_at: DateTime<Utc>,
    },
    Activate {
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TenantEvent {
    Created {
        tenant_id: TenantId,
        name: String,
        slug: String,
        occurred_at: DateTime<Utc>,
    },
    Renamed {
        name: String,
        occurred_at: DateTime<Utc>,
    },
    Suspended {
        occurred_at: DateTime<Utc>,
    },
    Activated {
        occurred_at: DateTime<Utc>,
    },
}

impl Event for TenantEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TenantEvent::Created { .. } => "auth.tenant.created",
            TenantEvent::Renamed { .. } => "auth.tenant.renamed",
            TenantEvent::Suspended { .. } => "auth.tenant.suspended",
            TenantEvent::Activated { .. } => "auth.tenant.activated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TenantEvent::Created { occurred_at, .. }
            | TenantEvent::Renamed { occurred_at, .. }
            | TenantEvent::Suspended { occurred_at }
            | TenantEvent::Activated { occurred_at } => *occurred_at,
        }
    }
}

impl Aggregate for Tenant {
    type Command = TenantCommand;
    type Event = TenantEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TenantEvent::Created {
                tenant_id,
                name,
                slug,
                occurred_at,
            } => {
                self.id = *tenant_id;
                self.name = name.clone();
                self.slug = slug.clone();
                self.status = TenantStatus::Active;
                self.created_at = Some(*occurred_at);
                self.created = true;
            }
            TenantEvent::Renamed { name, .. } => self.name = name.clone(),
            TenantEvent::Suspended { .. } => self.status = TenantStatus::Suspended,
            TenantEvent::Activated { .. } => self.status = TenantStatus::Active,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !self.created && !matches!(command, TenantCommand::Create { .. }) {
            return Err(DomainError::NotFound);
        }

        match command {
            TenantCommand::Create {
                tenant_id,
                name,
                slug,
                occurred_at,
            } => {
                if self.created {
                    return Err(DomainError::conflict("tenant already exists"));
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err(DomainError::validation("tenant name cannot be empty"));
                }
                Ok(vec![TenantEvent::Created {
                    tenant_id: *tenant_id,
                    name: name.to_string(),
                    slug: normalize_slug(slug)?,
                    occurred_at: *occurred_at,
                }])
            }
            TenantCommand::Rename { name, occurred_at } => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(DomainError::validation("tenant name cannot be empty"));
                }
                if name == self.name {
                    return Ok(vec![]);
                }
                Ok(vec![TenantEvent::Renamed {
                    name: name.to_string(),
                    occurred_at: *occurred_at,
                }])
            }
            TenantCommand::Suspend { occurred_at } => {
                if self.status == TenantStatus::Suspended {
                    return Err(DomainError::invariant("tenant already suspended"));
                }
                Ok(vec![TenantEvent::Suspended {
                    occurred_at: *occurred_at,
                }])
            }
            TenantCommand::Activate { occurred_at } => {
                if self.status == TenantStatus::Active {
                    return Err(DomainError::invariant("tenant already active"));
                }
                Ok(vec![TenantEvent::Activated {
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl Auditable for Tenant {
    const ENTITY_TYPE: &'static str = "tenant";

    fn audit_snapshot(&self) -> Option<JsonValue> {
        self.created.then(|| {
            json!({
                "name": self.name,
                "slug": self.slug,
                "status": self.status,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created() -> Tenant {
        let id = TenantId::new();
        let mut t = Tenant::empty(id);
        let events = t
            .handle(&TenantCommand::Create {
                tenant_id: id,
                name: " Acme ".into(),
                slug: "Acme-GmbH".into(),
                occurred_at: Utc::now(),
            })
            .unwrap();
        for e in &events {
            t.apply(e);
        }
        t
    }

    #[test]
    fn create_normalizes_name_and_slug() {
        let t = created();
        assert_eq!(t.name, "Acme");
        assert_eq!(t.slug, "acme-gmbh");
        assert_eq!(t.version, 1);
    }

    #[test]
    fn slug_rules() {
        assert!(normalize_slug("a").is_err());
        assert!(normalize_slug("-abc").is_err());
        assert!(normalize_slug("ab_c").is_err());
        assert_eq!(normalize_slug("ab-12").unwrap(), "ab-12");
    }

    #[test]
    fn suspend_twice_is_an_invariant_violation() {
        let mut t = created();
        let events = t.handle(&TenantCommand::Suspend { occurred_at: Utc::now() }).unwrap();
        t.apply(&events[0]);
        assert_eq!(t.status, TenantStatus::Suspended);
        assert!(matches!(
            t.handle(&TenantCommand::Suspend { occurred_at: Utc::now() }),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn commands_on_missing_tenant_are_not_found() {
        let t = Tenant::empty(TenantId::new());
        assert_eq!(
            t.handle(&TenantCommand::Rename { name: "x".into(), occurred_at: Utc::now() })
                .unwrap_err(),
            DomainError::NotFound
        );
    }
}
