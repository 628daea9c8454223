use kontor_auth::{JwtClaims, Role};
use kontor_core::{TenantId, UserId};

/// Who is calling and for which tenant, as asserted by a verified bearer token.
///
/// The tenant comes from the token only. No handler reads it from the path, query
/// or body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    tenant_id: TenantId,
    user_id: UserId,
    roles: Vec<Role>,
}

impl Session {
    pub fn new(tenant_id: TenantId, user_id: UserId, roles: Vec<Role>) -> Self {
        Self {
            tenant_id,
            user_id,
            roles,
        }
    }

    pub fn from_claims(claims: &JwtClaims) -> Self {
        Self::new(claims.tenant_id, claims.sub, claims.roles.clone())
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}
