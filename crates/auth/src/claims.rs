use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kontor_core::{TenantId, UserId};

use crate::Role;

/// Tolerated clock difference between the issuing and the validating host.
pub const CLOCK_SKEW_SECS: i64 = 30;

/// What a session token asserts: one user acting in one tenant with these roles.
///
/// Roles are names only. What they grant is looked up in the tenant's current role
/// definitions on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: UserId,
    pub tenant_id: TenantId,
    pub roles: Vec<Role>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl JwtClaims {
    pub fn new(sub: UserId, tenant_id: TenantId, roles: Vec<Role>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            sub,
            tenant_id,
            roles,
            issued_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check the validity window at `now`. Expiry is exact; issue time allows
    /// [`CLOCK_SKEW_SECS`] of drift.
    pub fn check_window(&self, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
        if self.expires_at <= self.issued_at {
            return Err(TokenValidationError::InvalidTimeWindow);
        }
        if now + Duration::seconds(CLOCK_SKEW_SECS) < self.issued_at {
            return Err(TokenValidationError::NotYetValid);
        }
        if now >= self.expires_at {
            return Err(TokenValidationError::Expired);
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token issued in the future")]
    NotYetValid,

    #[error("token expires before it was issued")]
    InvalidTimeWindow,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(now: DateTime<Utc>, ttl_minutes: i64) -> JwtClaims {
        JwtClaims::new(UserId::new(), TenantId::new(), vec![Role::ADMIN], now, Duration::minutes(ttl_minutes))
    }

    #[test]
    fn window_bounds() {
        let now = Utc::now();
        let c = claims(now, 60);
        assert_eq!(c.check_window(now), Ok(()));
        assert_eq!(c.check_window(now + Duration::minutes(60)), Err(TokenValidationError::Expired));
        assert_eq!(c.check_window(now - Duration::seconds(10)), Ok(()));
        assert_eq!(
            c.check_window(now - Duration::minutes(5)),
            Err(TokenValidationError::NotYetValid)
        );
        assert_eq!(claims(now, 0).check_window(now), Err(TokenValidationError::InvalidTimeWindow));
    }
}
