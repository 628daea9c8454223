//! User aggregate (event-sourced).
//!
//! Users belong to exactly one tenant. Email uniqueness per tenant is enforced by the
//! user directory in infra, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use kontor_core::{Aggregate, AggregateRoot, Auditable, DomainError, TenantId, UserId};
use kontor_events::Event;

use crate::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
}

// ─────────────────────────────────────────────────────────────────────────────
// User Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// # Invariants
/// - `tenant_id` is immutable after creation.
/// - Suspended users cannot be granted roles.
/// - Actors cannot grant roles they do not hold themselves (unless admin).
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub tenant_id: Option<TenantId>,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: Vec<Role>,
    pub status: UserStatus,
    pub version: u64,
    pub created: bool,
}

impl User {
    pub fn empty(id: UserId) -> Self {
        Self {
            id,
            tenant_id: None,
            email: String::new(),
            display_name: String::new(),
            password_hash: String::new(),
            roles: Vec::new(),
            status: UserStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    fn ensure_exists(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::TenantMismatch);
        }
        Ok(())
    }
}

impl AggregateRoot for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Lowercase and sanity-check an email address.
pub fn normalize_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("invalid email format"));
    }
    Ok(email)
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    /// Already hashed by [`crate::password::hash_password`].
    pub password_hash: String,
    pub initial_roles: Vec<Role>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRole {
    pub tenant_id: TenantId,
    pub role: Role,
    /// Roles of the acting user (escalation check).
    pub actor_roles: Vec<Role>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserCommand {
    Create(CreateUser),
    UpdateProfile {
        tenant_id: TenantId,
        display_name: String,
        occurred_at: DateTime<Utc>,
    },
    ChangePassword {
        tenant_id: TenantId,
        password_hash: String,
        occurred_at: DateTime<Utc>,
    },
    AssignRole(AssignRole),
    RevokeRole {
        tenant_id: TenantId,
        role: Role,
        occurred_at: DateTime<Utc>,
    },
    Suspend {
        tenant_id: TenantId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Activate {
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreated {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub initial_roles: Vec<Role>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserEvent {
    Created(UserCreated),
    ProfileUpdated {
        display_name: String,
        occurred_at: DateTime<Utc>,
    },
    PasswordChanged {
        password_hash: String,
        occurred_at: DateTime<Utc>,
    },
    RoleAssigned {
        role: Role,
        occurred_at: DateTime<Utc>,
    },
    RoleRevoked {
        role: Role,
        occurred_at: DateTime<Utc>,
    },
    Suspended {
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Activated {
        occurred_at: DateTime<Utc>,
    },
}

impl Event for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Created(_) => "auth.user.created",
            UserEvent::ProfileUpdated { .. } => "auth.user.profile_updated",
            UserEvent::PasswordChanged { .. } => "auth.user.password_changed",
            UserEvent::RoleAssigned { .. } => "auth.user.role_assigned",
            UserEvent::RoleRevoked { .. } => "auth.user.role_revoked",
            UserEvent::Suspended { .. } => "auth.user.suspended",
            UserEvent::Activated { .. } => "auth.user.activated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Created(e) => e.occurred_at,
            UserEvent::ProfileUpdated { occurred_at, .. }
            | UserEvent::PasswordChanged { occurred_at, .. }
            | UserEvent::RoleAssigned { occurred_at, .. }
            | UserEvent::RoleRevoked { occurred_at, .. }
            | UserEvent::Suspended { occurred_at, .. }
            | UserEvent::Activated { occurred_at } => *occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for User {
    type Command = UserCommand;
    type Event = UserEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UserEvent::Created(e) => {
                self.id = e.user_id;
                self.tenant_id = Some(e.tenant_id);
                self.email = e.email.clone();
                self.display_name = e.display_name.clone();
                self.password_hash = e.password_hash.clone();
                self.roles = e.initial_roles.clone();
                self.status = UserStatus::Active;
                self.created = true;
            }
            UserEvent::ProfileUpdated { display_name, .. } => {
                self.display_name = display_name.clone();
            }
            UserEvent::PasswordChanged { password_hash, .. } => {
                self.password_hash = password_hash.clone();
            }
            UserEvent::RoleAssigned { role, .. } => self.roles.push(role.clone()),
            UserEvent::RoleRevoked { role, .. } => self.roles.retain(|r| r != role),
            UserEvent::Suspended { .. } => self.status = UserStatus::Suspended,
            UserEvent::Activated { .. } => self.status = UserStatus::Active,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UserCommand::Create(cmd) => self.handle_create(cmd),
            UserCommand::UpdateProfile {
                tenant_id,
                display_name,
                occurred_at,
            } => {
                self.ensure_exists(*tenant_id)?;
                let display_name = display_name.trim();
                if display_name.is_empty() {
                    return Err(DomainError::validation("display name cannot be empty"));
                }
                if display_name == self.display_name {
                    return Ok(vec![]);
                }
                Ok(vec![UserEvent::ProfileUpdated {
                    display_name: display_name.to_string(),
                    occurred_at: *occurred_at,
                }])
            }
            UserCommand::ChangePassword {
                tenant_id,
                password_hash,
                occurred_at,
            } => {
                self.ensure_exists(*tenant_id)?;
                if password_hash.is_empty() {
                    return Err(DomainError::validation("password hash cannot be empty"));
                }
                Ok(vec![UserEvent::PasswordChanged {
                    password_hash: password_hash.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            UserCommand::AssignRole(cmd) => self.handle_assign_role(cmd),
            UserCommand::RevokeRole {
                tenant_id,
                role,
                occurred_at,
            } => {
                self.ensure_exists(*tenant_id)?;
                if !self.has_role(role) {
                    return Err(DomainError::invariant("role not assigned"));
                }
                Ok(vec![UserEvent::RoleRevoked {
                    role: role.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            UserCommand::Suspend {
                tenant_id,
                reason,
                occurred_at,
            } => {
                self.ensure_exists(*tenant_id)?;
                if self.status == UserStatus::Suspended {
                    return Err(DomainError::invariant("user already suspended"));
                }
                Ok(vec![UserEvent::Suspended {
                    reason: reason.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            UserCommand::Activate {
                tenant_id,
                occurred_at,
            } => {
                self.ensure_exists(*tenant_id)?;
                if self.status == UserStatus::Active {
                    return Err(DomainError::invariant("user already active"));
                }
                Ok(vec![UserEvent::Activated {
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl User {
    fn handle_create(&self, cmd: &CreateUser) -> Result<Vec<UserEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("user already exists"));
        }
        let email = normalize_email(&cmd.email)?;
        let display_name = cmd.display_name.trim();
        if display_name.is_empty() {
            return Err(DomainError::validation("display name cannot be empty"));
        }
        if cmd.password_hash.is_empty() {
            return Err(DomainError::validation("password hash cannot be empty"));
        }

        let mut roles: Vec<Role> = Vec::new();
        for role in &cmd.initial_roles {
            if !roles.contains(role) {
                roles.push(role.clone());
            }
        }

        Ok(vec![UserEvent::Created(UserCreated {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            email,
            display_name: display_name.to_string(),
            password_hash: cmd.password_hash.clone(),
            initial_roles: roles,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_role(&self, cmd: &AssignRole) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id)?;
        if self.status == UserStatus::Suspended {
            return Err(DomainError::invariant("user is suspended"));
        }
        if self.has_role(&cmd.role) {
            return Err(DomainError::invariant("role already assigned"));
        }

        let actor_is_admin = cmd.actor_roles.contains(&Role::ADMIN);
        if !actor_is_admin && !cmd.actor_roles.contains(&cmd.role) {
            return Err(DomainError::Unauthorized);
        }

        Ok(vec![UserEvent::RoleAssigned {
            role: cmd.role.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }
}

impl Auditable for User {
    const ENTITY_TYPE: &'static str = "user";

    fn audit_snapshot(&self) -> Option<JsonValue> {
        self.created.then(|| {
            json!({
                "email": self.email,
                "display_name": self.display_name,
                "password_hash": self.password_hash,
                "roles": self.roles,
                "status": self.status,
            })
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_user(tenant_id: TenantId, roles: Vec<Role>) -> User {
        let user_id = UserId::new();
        let mut user = User::empty(user_id);
        let cmd = UserCommand::Create(CreateUser {
            tenant_id,
            user_id,
            email: " Alice@Example.com ".to_string(),
            display_name: "Alice".to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaA".to_string(),
            initial_roles: roles,
            occurred_at: now(),
        });
        for event in user.handle(&cmd).unwrap() {
            user.apply(&event);
        }
        user
    }

    #[test]
    fn create_lowercases_email() {
        let user = created_user(TenantId::new(), vec![Role::new("viewer")]);
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.version, 1);
    }

    #[test]
    fn invalid_email_is_rejected() {
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("a@localhost").is_err());
        assert!(normalize_email("a b@x.de").is_err());
    }

    #[test]
    fn privilege_escalation_is_blocked() {
        let tenant_id = TenantId::new();
        let user = created_user(tenant_id, vec![]);
        let cmd = UserCommand::AssignRole(AssignRole {
            tenant_id,
            role: Role::ADMIN,
            actor_roles: vec![Role::new("manager")],
            occurred_at: now(),
        });
        assert_eq!(user.handle(&cmd).unwrap_err(), DomainError::Unauthorized);
    }

    #[test]
    fn suspended_users_cannot_gain_roles() {
        let tenant_id = TenantId::new();
        let mut user = created_user(tenant_id, vec![]);
        for e in user
            .handle(&UserCommand::Suspend {
                tenant_id,
                reason: "left".into(),
                occurred_at: now(),
            })
            .unwrap()
        {
            user.apply(&e);
        }

        let err = user
            .handle(&UserCommand::AssignRole(AssignRole {
                tenant_id,
                role: Role::new("viewer"),
                actor_roles: vec![Role::ADMIN],
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("suspended"));
    }

    #[test]
    fn cross_tenant_commands_are_rejected() {
        let user = created_user(TenantId::new(), vec![Role::new("viewer")]);
        let err = user
            .handle(&UserCommand::RevokeRole {
                tenant_id: TenantId::new(),
                role: Role::new("viewer"),
                occurred_at: now(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("tenant"));
    }

    #[test]
    fn snapshot_carries_password_hash_for_masking() {
        let user = created_user(TenantId::new(), vec![]);
        let snap = user.audit_snapshot().unwrap();
        assert!(snap.get("password_hash").is_some());
        assert!(User::empty(UserId::new()).audit_snapshot().is_none());
    }
}
