//! HTTP application wiring.
//!
//! `services/` holds the use cases, `routes/` the REST handlers for files, identity
//! and the realtime stream. GraphQL lives in `crate::graphql`.

use std::sync::Arc;

use axum::{Extension, Router, extract::DefaultBodyLimit, routing::get};
use tower::ServiceBuilder;

use crate::graphql;
use crate::middleware::{self, Authenticator};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Room for multipart framing on top of the upload limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_app(services: Arc<services::AppServices>) -> Router {
    let auth = Authenticator::new(services.jwt());
    let body_limit = services.config().max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(graphql_routes(services.clone(), auth.clone()))
        .merge(rest_routes(services, auth))
        .layer(ServiceBuilder::new().layer(DefaultBodyLimit::max(body_limit)))
}

fn rest_routes(services: Arc<services::AppServices>, auth: Authenticator) -> Router {
    routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(auth, middleware::require_session))
}

fn graphql_routes(services: Arc<services::AppServices>, auth: Authenticator) -> Router {
    Router::new()
        .route("/graphql", get(graphql::graphiql).post(graphql::graphql_handler))
        .layer(Extension(graphql::build_schema(services)))
        .layer(axum::middleware::from_fn_with_state(auth, middleware::attach_session))
}
