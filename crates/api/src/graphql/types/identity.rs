use async_graphql::{ID, Json, Object, SimpleObject, Union};
use chrono::{DateTime, Utc};

use kontor_auth::{PermissionDict, RoleDefinition, Tenant as DomainTenant, User as DomainUser};

use crate::app::services::{AuthFailure, AuthSession};
use crate::graphql::types::enums::{TenantStatus, UserStatus};

#[derive(Clone)]
pub struct Tenant {
    pub inner: DomainTenant,
}

impl From<DomainTenant> for Tenant {
    fn from(tenant: DomainTenant) -> Self {
        Self { inner: tenant }
    }
}

#[Object]
impl Tenant {
    async fn id(&self) -> ID {
        ID(self.inner.id.to_string())
    }

    async fn name(&self) -> &str {
        &self.inner.name
    }

    /// Unique login handle of the tenant.
    async fn slug(&self) -> &str {
        &self.inner.slug
    }

    async fn status(&self) -> TenantStatus {
        self.inner.status.into()
    }

    async fn created_at(&self) -> Option<DateTime<Utc>> {
        self.inner.created_at
    }
}

/// A user of one tenant. The password hash is never exposed.
#[derive(Clone)]
pub struct User {
    pub inner: DomainUser,
}

impl From<DomainUser> for User {
    fn from(user: DomainUser) -> Self {
        Self { inner: user }
    }
}

#[Object]
impl User {
    async fn id(&self) -> ID {
        ID(self.inner.id.to_string())
    }

    async fn email(&self) -> &str {
        &self.inner.email
    }

    async fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    /// Role names; what they grant is defined per tenant.
    async fn roles(&self) -> Vec<String> {
        self.inner.roles.iter().map(|r| r.as_str().to_string()).collect()
    }

    async fn status(&self) -> UserStatus {
        self.inner.status.into()
    }
}

#[derive(Clone)]
pub struct Role {
    pub inner: RoleDefinition,
}

impl From<RoleDefinition> for Role {
    fn from(role: RoleDefinition) -> Self {
        Self { inner: role }
    }
}

#[Object]
impl Role {
    async fn name(&self) -> &str {
        self.inner.name.as_str()
    }

    async fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    /// `{module: [action, ...]}`; `{"*": ["*"]}` grants everything.
    async fn permissions(&self) -> Json<PermissionDict> {
        Json(self.inner.permissions.clone())
    }

    /// The flattened `module.action` strings.
    async fn grants(&self) -> Vec<String> {
        self.inner.flatten().iter().map(|p| p.as_str().to_string()).collect()
    }
}

#[derive(SimpleObject)]
pub struct AuthPayload {
    /// Bearer token for subsequent requests.
    pub token: String,
    pub tenant: Tenant,
    pub user: User,
}

impl From<AuthSession> for AuthPayload {
    fn from(session: AuthSession) -> Self {
        Self {
            token: session.token,
            tenant: session.tenant.into(),
            user: session.user.into(),
        }
    }
}

#[derive(SimpleObject)]
pub struct Viewer {
    pub tenant: Tenant,
    pub user: User,
}

#[derive(SimpleObject)]
pub struct AuthError {
    /// `INVALID_CREDENTIALS`, `ACCOUNT_SUSPENDED` or `UNAUTHENTICATED`.
    pub code: String,
    pub message: String,
}

impl From<AuthFailure> for AuthError {
    fn from(failure: AuthFailure) -> Self {
        Self {
            code: failure.code().to_string(),
            message: failure.message().to_string(),
        }
    }
}

#[derive(Union)]
pub enum LoginResult {
    Session(AuthPayload),
    Error(AuthError),
}

#[derive(Union)]
pub enum MeResult {
    Viewer(Viewer),
    Error(AuthError),
}
