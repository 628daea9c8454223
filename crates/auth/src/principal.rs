use thiserror::Error;

use kontor_core::{TenantId, UserId};

use crate::{Permission, Role, RoleDefinition, resolve_permissions};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(Permission),
}

/// The caller of one request with its effective permissions inside its tenant.
///
/// Built per request from the token's role names and the tenant's role definitions
/// at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    user_id: UserId,
    tenant_id: TenantId,
    roles: Vec<Role>,
    permissions: Vec<Permission>,
}

impl Principal {
    pub fn resolve(user_id: UserId, tenant_id: TenantId, roles: Vec<Role>, definitions: &[RoleDefinition]) -> Self {
        let permissions = resolve_permissions(&roles, definitions);
        Self {
            user_id,
            tenant_id,
            roles,
            permissions,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn can(&self, required: &Permission) -> bool {
        self.permissions.iter().any(|p| p.grants(required))
    }

    /// Pure policy check. Unknown role names contribute nothing.
    pub fn require(&self, required: &Permission) -> Result<(), AuthzError> {
        if self.can(required) {
            Ok(())
        } else {
            Err(AuthzError::Forbidden(required.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_roles;
    use crate::permissions::names;

    fn principal(roles: &[&'static str]) -> Principal {
        Principal::resolve(
            UserId::new(),
            TenantId::new(),
            roles.iter().map(|r| Role::new(*r)).collect(),
            &default_roles(),
        )
    }

    #[test]
    fn viewer_reads_but_does_not_write() {
        let viewer = principal(&["viewer"]);
        assert!(viewer.require(&names::CUSTOMERS_READ).is_ok());
        assert_eq!(
            viewer.require(&names::CUSTOMERS_WRITE),
            Err(AuthzError::Forbidden(names::CUSTOMERS_WRITE))
        );
    }

    #[test]
    fn admin_holds_everything_and_strangers_nothing() {
        assert!(principal(&["admin"]).can(&names::AUDIT_READ));
        assert!(!principal(&["ghost"]).can(&names::CUSTOMERS_READ));
        assert!(principal(&[]).permissions().is_empty());
    }
}
