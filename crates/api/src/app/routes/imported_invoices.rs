use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Multipart, Path},
    http::{StatusCode, header},
    response::IntoResponse,
};

use kontor_invoicing::ImportedInvoiceId;

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::app::routes::common::read_file_field;
use crate::app::services::AppServices;
use crate::context::Session;

/// `POST /api/imported-invoices`: store the upload and queue extraction.
pub async fn upload(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    mut multipart: Multipart,
) -> axum::response::Response {
    let file = match read_file_field(&mut multipart).await {
        Ok(file) => file,
        Err(e) => return e.into_response(),
    };
    match services.upload_invoice(&session, &file.filename, &file.bytes) {
        Ok(record) => (StatusCode::CREATED, Json(dto::imported_invoice_to_json(&record))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/imported-invoices/:id/file`: the stored original.
pub async fn download(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Ok(id) = id.parse::<ImportedInvoiceId>() else {
        return ApiError::not_found("imported invoice").into_response();
    };
    match services.imported_invoice_file(&session, id) {
        Ok((file, bytes)) => {
            let disposition = format!("attachment; filename=\"{}\"", file.filename.replace('"', ""));
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, file.kind.content_type().to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}
