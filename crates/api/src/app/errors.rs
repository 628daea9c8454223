//! One error type for every service call, rendered as REST JSON or as a GraphQL error
//! with an `extensions.code`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use thiserror::Error;

use kontor_auth::password::PasswordError;
use kontor_auth::{AuthzError, JwtError};
use kontor_banking::Mt940Error;
use kontor_core::DomainError;
use kontor_infra::StoreError;
use kontor_infra::command_dispatcher::DispatchError;
use kontor_infra::jobs::JobStoreError;
use kontor_invoicing::{NumberingError, UploadError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ApiError::NotFound(format!("{} not found", what.into()))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    /// GraphQL `extensions.code`.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Validation(_) => "VALIDATION",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Concurrency(msg) => ApiError::Conflict(msg),
            DispatchError::Validation(msg) | DispatchError::InvariantViolation(msg) => ApiError::Validation(msg),
            DispatchError::Unauthorized => ApiError::Forbidden("not allowed".to_string()),
            DispatchError::NotFound => ApiError::NotFound("not found".to_string()),
            DispatchError::TenantIsolation(msg) => ApiError::Forbidden(msg),
            DispatchError::Deserialize(msg) => ApiError::Internal(msg),
            DispatchError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvariantViolation(msg) | DomainError::InvalidId(msg) => {
                ApiError::Validation(msg)
            }
            DomainError::Conflict(msg) => ApiError::Conflict(msg),
            DomainError::Unauthorized => ApiError::Forbidden("not allowed".to_string()),
            DomainError::TenantMismatch => ApiError::Forbidden("tenant mismatch".to_string()),
            DomainError::NotFound => ApiError::NotFound("not found".to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(msg) => ApiError::Conflict(msg),
            StoreError::NotFound(msg) => ApiError::NotFound(format!("{msg} not found")),
            StoreError::Numbering(e) => e.into(),
            other => {
                tracing::error!(error = %other, "store failure");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<NumberingError> for ApiError {
    fn from(err: NumberingError) -> Self {
        DomainError::from(err).into()
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        ApiError::Forbidden(err.to_string())
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Signing(msg) => ApiError::Internal(msg),
            _ => ApiError::Unauthenticated,
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Duplicate => ApiError::Conflict(err.to_string()),
            other => ApiError::Validation(other.to_string()),
        }
    }
}

impl From<Mt940Error> for ApiError {
    fn from(err: Mt940Error) -> Self {
        ApiError::Validation(format!("invalid MT940 file: {err}"))
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<JobStoreError> for ApiError {
    fn from(err: JobStoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let code = self.code().to_ascii_lowercase();
        json_error(self.status(), &code, self.to_string())
    }
}

impl async_graphql::ErrorExtensions for ApiError {
    fn extend(&self) -> async_graphql::Error {
        let code = self.code();
        async_graphql::Error::new(self.to_string()).extend_with(|_, ext| ext.set("code", code.to_string()))
    }
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
