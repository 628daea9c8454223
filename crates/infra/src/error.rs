use thiserror::Error;

use kontor_invoicing::NumberingError;

/// Failure of a non-event-sourced store (number schemes, audit log, banking, files).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Numbering(#[from] NumberingError),

    #[error("database error in {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn poisoned() -> Self {
        StoreError::Unavailable("lock poisoned".to_string())
    }
}

/// Map an sqlx error, keeping the name of the failed operation.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            StoreError::Duplicate(format!("{operation}: {}", db_err.message()))
        }
        sqlx::Error::Database(db_err) => StoreError::Database {
            operation: operation.to_string(),
            message: db_err.message().to_string(),
        },
        sqlx::Error::RowNotFound => StoreError::NotFound(operation.to_string()),
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("{operation}: connection pool unavailable"))
        }
        other => StoreError::Database {
            operation: operation.to_string(),
            message: other.to_string(),
        },
    }
}
