use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    response::{IntoResponse, sse::Event as SseEvent},
};

use crate::app::services::{self, AppServices};
use crate::context::Session;

/// Liveness only; does not touch Postgres or the job executor.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "kontor",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// The token's view of the caller, without consulting the user store.
pub async fn whoami(
    Extension(session): Extension<Session>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "tenant_id": session.tenant_id().to_string(),
        "user_id": session.user_id().to_string(),
        "roles": session.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
    }))
}

/// Server-sent events for the caller's tenant, one per committed event.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
) -> axum::response::Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    services::tenant_sse_stream(services, session.tenant_id())
}
