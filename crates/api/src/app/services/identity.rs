//! Tenants, users, roles and login.

use chrono::{Duration, Utc};

use kontor_audit::AuditEntry;
use kontor_auth::password::{hash_password, validate_password, verify_password};
use kontor_auth::permissions::names;
use kontor_auth::tenant::normalize_slug;
use kontor_auth::user::{AssignRole, CreateUser, normalize_email};
use kontor_auth::{
    JwtClaims, PermissionDict, Role, RoleDefinition, Tenant, TenantCommand, TenantStatus, User, UserCommand,
    UserStatus, default_roles,
};
use kontor_core::{AggregateId, TenantId, UserId};
use kontor_infra::audit_log::AuditSink;
use kontor_infra::projections::aggregate_types;
use kontor_infra::read_model::{Scope, TenantStore};

use super::{AppServices, keys};
use crate::app::errors::ApiError;
use crate::context::Session;

#[derive(Debug, Clone)]
pub struct SignupInput {
    pub tenant_name: String,
    pub slug: String,
    pub email: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub roles: Vec<Role>,
}

/// A fresh token with the records it was issued for.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub tenant: Tenant,
    pub user: User,
}

/// Why a login was refused. Deliberately does not say which credential was wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    Suspended,
    Unauthenticated,
}

impl AuthFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthFailure::Suspended => "ACCOUNT_SUSPENDED",
            AuthFailure::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthFailure::InvalidCredentials => "invalid tenant, email or password",
            AuthFailure::Suspended => "account or tenant is suspended",
            AuthFailure::Unauthenticated => "authentication required",
        }
    }
}

impl AppServices {
    /// Create a tenant with the default roles and its first (admin) user.
    #[tracing::instrument(skip_all, fields(slug = %input.slug))]
    pub fn signup(&self, input: SignupInput) -> Result<AuthSession, ApiError> {
        let slug = normalize_slug(&input.slug)?;
        normalize_email(&input.email)?;
        validate_password(&input.password)?;

        let tenant_id = TenantId::new();
        let tenant_key = AggregateId::from(tenant_id);
        self.unique.claim(Scope::Global, keys::TENANT_SLUG, &slug, tenant_key)?;

        let result = self.bootstrap_tenant(tenant_id, slug.clone(), input);
        if result.is_err() {
            self.unique.release(Scope::Global, keys::TENANT_SLUG, &slug, tenant_key);
        }
        result
    }

    fn bootstrap_tenant(&self, tenant_id: TenantId, slug: String, input: SignupInput) -> Result<AuthSession, ApiError> {
        let tenant = self.execute(
            tenant_id,
            None,
            AggregateId::from(tenant_id),
            aggregate_types::TENANT,
            TenantCommand::Create {
                tenant_id,
                name: input.tenant_name,
                slug,
                occurred_at: Utc::now(),
            },
            |t, _| Tenant::empty(t),
        )?;

        for role in default_roles() {
            self.roles.upsert(tenant_id, role.name.as_str().to_string(), role);
        }

        let user = self.register_user(
            tenant_id,
            None,
            NewUser {
                email: input.email,
                display_name: input.display_name,
                password: input.password,
                roles: vec![Role::ADMIN],
            },
        )?;
        tracing::info!(tenant_id = %tenant_id, "tenant created");

        let token = self.issue_token(&user, tenant_id)?;
        Ok(AuthSession { token, tenant, user })
    }

    /// `Ok(Err(_))` is a refused login, reported to the client as data.
    #[tracing::instrument(skip_all, fields(slug = %slug))]
    pub fn login(&self, slug: &str, email: &str, password: &str) -> Result<Result<AuthSession, AuthFailure>, ApiError> {
        let Some((tenant, user)) = self.find_login(slug, email) else {
            return Ok(Err(AuthFailure::InvalidCredentials));
        };
        if !verify_password(password, &user.password_hash) {
            tracing::info!(tenant_id = %tenant.id, "login refused");
            return Ok(Err(AuthFailure::InvalidCredentials));
        }
        if tenant.status == TenantStatus::Suspended || user.status == UserStatus::Suspended {
            return Ok(Err(AuthFailure::Suspended));
        }

        let token = self.issue_token(&user, tenant.id)?;
        Ok(Ok(AuthSession { token, tenant, user }))
    }

    fn find_login(&self, slug: &str, email: &str) -> Option<(Tenant, User)> {
        let slug = normalize_slug(slug).ok()?;
        let email = normalize_email(email).ok()?;
        let tenant_key = self.unique.owner(Scope::Global, keys::TENANT_SLUG, &slug)?;
        let tenant_id = TenantId::from(tenant_key);
        let tenant = self.projections.tenants.get(tenant_id, tenant_key)?;
        let user_key = self.unique.owner(Scope::Tenant(tenant_id), keys::USER_EMAIL, &email)?;
        let user = self.projections.users.get(tenant_id, user_key)?;
        Some((tenant, user))
    }

    fn issue_token(&self, user: &User, tenant_id: TenantId) -> Result<String, ApiError> {
        let claims = JwtClaims::new(
            user.id,
            tenant_id,
            user.roles.clone(),
            Utc::now(),
            Duration::minutes(self.config.jwt_ttl_minutes),
        );
        Ok(self.jwt.issue(&claims)?)
    }

    /// The signed-in user and tenant, or why the session is not usable.
    pub fn me(&self, session: Option<&Session>) -> Result<(Tenant, User), AuthFailure> {
        let session = session.ok_or(AuthFailure::Unauthenticated)?;
        let user = self.active_user(session).map_err(|e| match e {
            ApiError::Forbidden(_) => AuthFailure::Suspended,
            _ => AuthFailure::Unauthenticated,
        })?;
        let tenant = self.tenant_record(session.tenant_id()).map_err(|_| AuthFailure::Unauthenticated)?;
        Ok((tenant, user))
    }

    fn tenant_record(&self, tenant_id: TenantId) -> Result<Tenant, ApiError> {
        self.projections
            .tenants
            .get(tenant_id, AggregateId::from(tenant_id))
            .filter(|t| t.created)
            .ok_or_else(|| ApiError::not_found("tenant"))
    }

    pub fn tenant(&self, session: &Session) -> Result<Tenant, ApiError> {
        self.active_user(session)?;
        self.tenant_record(session.tenant_id())
    }

    pub fn rename_tenant(&self, session: &Session, name: String) -> Result<Tenant, ApiError> {
        self.authorize(session, &names::TENANT_WRITE)?;
        let tenant_id = session.tenant_id();
        self.execute(
            tenant_id,
            Some(session.user_id()),
            AggregateId::from(tenant_id),
            aggregate_types::TENANT,
            TenantCommand::Rename {
                name,
                occurred_at: Utc::now(),
            },
            |t, _| Tenant::empty(t),
        )
    }

    // ── users ────────────────────────────────────────────────────────────────

    pub fn users(&self, session: &Session) -> Result<Vec<User>, ApiError> {
        self.authorize(session, &names::USERS_READ)?;
        let mut users: Vec<User> = self
            .projections
            .users
            .list(session.tenant_id())
            .into_iter()
            .filter(|u| u.created)
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    pub fn user(&self, session: &Session, user_id: UserId) -> Result<User, ApiError> {
        self.authorize(session, &names::USERS_READ)?;
        self.user_record(session.tenant_id(), user_id)
    }

    fn user_record(&self, tenant_id: TenantId, user_id: UserId) -> Result<User, ApiError> {
        self.projections
            .users
            .get(tenant_id, AggregateId::from(user_id))
            .filter(|u| u.created)
            .ok_or_else(|| ApiError::not_found("user"))
    }

    pub fn create_user(&self, session: &Session, new: NewUser) -> Result<User, ApiError> {
        self.authorize(session, &names::USERS_WRITE)?;
        let actor_roles = session.roles();
        let escalates = !actor_roles.contains(&Role::ADMIN) && new.roles.iter().any(|r| !actor_roles.contains(r));
        if escalates {
            return Err(ApiError::Forbidden("cannot grant roles you do not hold".to_string()));
        }
        self.register_user(session.tenant_id(), Some(session.user_id()), new)
    }

    fn register_user(&self, tenant_id: TenantId, actor: Option<UserId>, new: NewUser) -> Result<User, ApiError> {
        let email = normalize_email(&new.email)?;
        validate_password(&new.password)?;
        self.ensure_roles_exist(tenant_id, &new.roles)?;
        let password_hash = hash_password(&new.password)?;

        let user_id = UserId::new();
        let key = AggregateId::from(user_id);
        self.unique.claim(Scope::Tenant(tenant_id), keys::USER_EMAIL, &email, key)?;

        let result = self.execute(
            tenant_id,
            actor,
            key,
            aggregate_types::USER,
            UserCommand::Create(CreateUser {
                tenant_id,
                user_id,
                email: email.clone(),
                display_name: new.display_name,
                password_hash,
                initial_roles: new.roles,
                occurred_at: Utc::now(),
            }),
            |_, id| User::empty(id.into()),
        );
        if result.is_err() {
            self.unique.release(Scope::Tenant(tenant_id), keys::USER_EMAIL, &email, key);
        }
        result
    }

    fn ensure_roles_exist(&self, tenant_id: TenantId, roles: &[Role]) -> Result<(), ApiError> {
        for role in roles {
            if self.roles.get(tenant_id, &role.as_str().to_string()).is_none() {
                return Err(ApiError::validation(format!("unknown role '{}'", role.as_str())));
            }
        }
        Ok(())
    }

    fn user_command(&self, session: &Session, user_id: UserId, command: UserCommand) -> Result<User, ApiError> {
        self.user_record(session.tenant_id(), user_id)?;
        self.execute(
            session.tenant_id(),
            Some(session.user_id()),
            AggregateId::from(user_id),
            aggregate_types::USER,
            command,
            |_, id| User::empty(id.into()),
        )
    }

    /// Users may edit their own profile; editing others needs `users.write`.
    pub fn update_user_profile(&self, session: &Session, user_id: UserId, display_name: String) -> Result<User, ApiError> {
        if user_id == session.user_id() {
            self.active_user(session)?;
        } else {
            self.authorize(session, &names::USERS_WRITE)?;
        }
        let command = UserCommand::UpdateProfile {
            tenant_id: session.tenant_id(),
            display_name,
            occurred_at: Utc::now(),
        };
        self.user_command(session, user_id, command)
    }

    pub fn change_password(&self, session: &Session, current: &str, new_password: &str) -> Result<User, ApiError> {
        let user = self.active_user(session)?;
        if !verify_password(current, &user.password_hash) {
            return Err(ApiError::validation("current password is wrong"));
        }
        validate_password(new_password)?;
        let command = UserCommand::ChangePassword {
            tenant_id: session.tenant_id(),
            password_hash: hash_password(new_password)?,
            occurred_at: Utc::now(),
        };
        self.user_command(session, user.id, command)
    }

    pub fn assign_role(&self, session: &Session, user_id: UserId, role: Role) -> Result<User, ApiError> {
        self.authorize(session, &names::USERS_WRITE)?;
        self.ensure_roles_exist(session.tenant_id(), std::slice::from_ref(&role))?;
        let command = UserCommand::AssignRole(AssignRole {
            tenant_id: session.tenant_id(),
            role,
            actor_roles: session.roles().to_vec(),
            occurred_at: Utc::now(),
        });
        self.user_command(session, user_id, command)
    }

    pub fn revoke_role(&self, session: &Session, user_id: UserId, role: Role) -> Result<User, ApiError> {
        self.authorize(session, &names::USERS_WRITE)?;
        if user_id == session.user_id() && role == Role::ADMIN {
            return Err(ApiError::validation("cannot revoke your own admin role"));
        }
        let command = UserCommand::RevokeRole {
            tenant_id: session.tenant_id(),
            role,
            occurred_at: Utc::now(),
        };
        self.user_command(session, user_id, command)
    }

    pub fn suspend_user(&self, session: &Session, user_id: UserId, reason: String) -> Result<User, ApiError> {
        self.authorize(session, &names::USERS_WRITE)?;
        if user_id == session.user_id() {
            return Err(ApiError::validation("cannot suspend yourself"));
        }
        let command = UserCommand::Suspend {
            tenant_id: session.tenant_id(),
            reason,
            occurred_at: Utc::now(),
        };
        self.user_command(session, user_id, command)
    }

    pub fn activate_user(&self, session: &Session, user_id: UserId) -> Result<User, ApiError> {
        self.authorize(session, &names::USERS_WRITE)?;
        let command = UserCommand::Activate {
            tenant_id: session.tenant_id(),
            occurred_at: Utc::now(),
        };
        self.user_command(session, user_id, command)
    }

    // ── roles ────────────────────────────────────────────────────────────────

    pub fn roles(&self, session: &Session) -> Result<Vec<RoleDefinition>, ApiError> {
        self.authorize(session, &names::ROLES_READ)?;
        let mut roles = self.roles.list(session.tenant_id());
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    /// Create or replace a role. Roles are plain records, so the audit entry is written
    /// here rather than by the dispatcher.
    pub fn upsert_role(
        &self,
        session: &Session,
        name: &str,
        description: Option<String>,
        permissions: PermissionDict,
    ) -> Result<RoleDefinition, ApiError> {
        self.authorize(session, &names::ROLES_WRITE)?;
        let role = RoleDefinition::new(name, description, permissions)?;
        if role.name == Role::ADMIN {
            return Err(ApiError::validation("the admin role cannot be changed"));
        }

        let tenant_id = session.tenant_id();
        let key = role.name.as_str().to_string();
        let before = self.roles.get(tenant_id, &key).and_then(|r| serde_json::to_value(r).ok());
        let after = serde_json::to_value(&role).ok();
        self.roles.upsert(tenant_id, key.clone(), role.clone());

        if let Some(entry) = AuditEntry::from_snapshots(
            tenant_id,
            Some(session.user_id()),
            "role",
            key,
            before.as_ref(),
            after.as_ref(),
            Utc::now(),
        ) {
            self.audit_sink.record(entry);
        }
        Ok(role)
    }
}
