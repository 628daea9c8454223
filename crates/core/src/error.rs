//! Errors raised by aggregates and value objects.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Business-rule failures. Deterministic: the same command against the same state
/// fails the same way. Storage and transport errors live in `kontor-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input: bad IBAN, negative quantity, empty name.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The command is well-formed but the aggregate's state forbids it.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not found")]
    NotFound,

    /// Duplicate creation, stale version, or a repeated state change.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The command names a tenant other than the one owning the aggregate.
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// `Ok` when the aggregate belongs to `expected`. A never-created aggregate
    /// (`owner == None`) is reported as not found.
    pub fn check_tenant<T: PartialEq>(owner: Option<T>, expected: T) -> DomainResult<()> {
        match owner {
            None => Err(Self::NotFound),
            Some(owner) if owner == expected => Ok(()),
            Some(_) => Err(Self::TenantMismatch),
        }
    }
}
