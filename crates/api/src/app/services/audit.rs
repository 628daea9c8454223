use kontor_audit::{AuditEntry, AuditQuery};
use kontor_auth::permissions::names;
use kontor_infra::audit_log::AuditLog;

use super::AppServices;
use crate::app::errors::ApiError;
use crate::context::Session;

impl AppServices {
    /// The tenant's audit trail, newest first.
    pub async fn audit_log(&self, session: &Session, query: AuditQuery) -> Result<Vec<AuditEntry>, ApiError> {
        self.authorize(session, &names::AUDIT_READ)?;
        if query.from.zip(query.to).is_some_and(|(from, to)| from > to) {
            return Err(ApiError::validation("'from' lies after 'to'"));
        }
        Ok(self.audit_log.query(session.tenant_id(), &query).await?)
    }
}
