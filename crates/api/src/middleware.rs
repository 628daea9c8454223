//! Bearer-token authentication. A verified token becomes a [`Session`] request extension.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use kontor_auth::JwtValidator;

use crate::context::Session;

#[derive(Clone)]
pub struct Authenticator {
    jwt: Arc<dyn JwtValidator>,
}

impl Authenticator {
    pub fn new(jwt: Arc<dyn JwtValidator>) -> Self {
        Self { jwt }
    }

    fn session(&self, token: &str) -> Result<Session, StatusCode> {
        match self.jwt.validate(token, Utc::now()) {
            Ok(claims) => Ok(Session::from_claims(&claims)),
            Err(e) => {
                tracing::debug!(error = %e, "rejected bearer token");
                Err(StatusCode::UNAUTHORIZED)
            }
        }
    }
}

/// REST routes: no session, no entry.
pub async fn require_session(
    State(auth): State<Authenticator>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)??;
    let session = auth.session(token)?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

/// GraphQL: anonymous requests pass through so `signup` and `login` work, and
/// resolvers reject them where a session is needed. A bad token is still a 401.
pub async fn attach_session(
    State(auth): State<Authenticator>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(token) = bearer_token(req.headers()) {
        let session = auth.session(token?)?;
        req.extensions_mut().insert(session);
    }
    Ok(next.run(req).await)
}

/// `None` without an `Authorization` header; an error when it is not a usable bearer token.
fn bearer_token(headers: &HeaderMap) -> Option<Result<&str, StatusCode>> {
    let value = headers.get(header::AUTHORIZATION)?;
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    Some(token.ok_or(StatusCode::UNAUTHORIZED))
}
