use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Multipart, Path},
    http::StatusCode,
    response::IntoResponse,
};

use kontor_banking::BankAccountId;

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::app::routes::common::read_file_field;
use crate::app::services::AppServices;
use crate::context::Session;

/// `POST /api/bank-accounts/:id/statements`: import an MT940 file.
pub async fn import(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> axum::response::Response {
    let Ok(account_id) = id.parse::<BankAccountId>() else {
        return ApiError::not_found("bank account").into_response();
    };
    let file = match read_file_field(&mut multipart).await {
        Ok(file) => file,
        Err(e) => return e.into_response(),
    };
    match services.import_statement(&session, account_id, &file.bytes) {
        Ok(result) => (StatusCode::OK, Json(dto::statement_import_to_json(&result))).into_response(),
        Err(e) => e.into_response(),
    }
}
