//! Permission guard run by every service operation before it touches state.
//!
//! Role names come from the token; what they grant comes from the tenant's current
//! role definitions, so editing a role takes effect without new tokens.

use kontor_auth::{Permission, Principal, RoleDefinition};

use crate::app::errors::ApiError;
use crate::context::Session;

fn principal_for(session: &Session, definitions: &[RoleDefinition]) -> Principal {
    Principal::resolve(session.user_id(), session.tenant_id(), session.roles().to_vec(), definitions)
}

pub fn require(session: &Session, definitions: &[RoleDefinition], required: &Permission) -> Result<(), ApiError> {
    principal_for(session, definitions).require(required).map_err(|e| {
        tracing::debug!(user_id = %session.user_id(), permission = %required, "permission denied");
        ApiError::from(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kontor_auth::permissions::names;
    use kontor_auth::{Role, default_roles};
    use kontor_core::{TenantId, UserId};

    fn session(roles: &[&'static str]) -> Session {
        Session::new(TenantId::new(), UserId::new(), roles.iter().map(|r| Role::new(*r)).collect())
    }

    #[test]
    fn denial_maps_to_forbidden() {
        let defs = default_roles();
        assert!(require(&session(&["manager"]), &defs, &names::INVOICES_WRITE).is_ok());
        assert!(matches!(
            require(&session(&["viewer"]), &defs, &names::CUSTOMERS_WRITE),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn missing_definitions_grant_nothing() {
        assert!(require(&session(&["viewer"]), &[], &names::CUSTOMERS_READ).is_err());
    }
}
