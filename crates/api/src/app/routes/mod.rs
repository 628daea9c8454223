use axum::{
    Router,
    routing::{get, post},
};

pub mod bank_statements;
pub mod common;
pub mod imported_invoices;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .route("/api/imported-invoices", post(imported_invoices::upload))
        .route("/api/imported-invoices/:id/file", get(imported_invoices::download))
        .route("/api/bank-accounts/:id/statements", post(bank_statements::import))
}
