//! GraphQL API: one schema with a query and a mutation root, wrapper types around the
//! domain records and input objects converted into service arguments.

pub mod inputs;
pub mod resolvers;
pub mod schema;
pub mod types;

use std::str::FromStr;
use std::sync::Arc;

use async_graphql::{Context, ErrorExtensions, ID};

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::Session;

pub use schema::{KontorSchema, build_schema, graphiql, graphql_handler};

/// Render service errors as GraphQL errors carrying `extensions.code`.
pub(crate) trait GqlResultExt<T> {
    fn gql(self) -> async_graphql::Result<T>;
}

impl<T> GqlResultExt<T> for Result<T, ApiError> {
    fn gql(self) -> async_graphql::Result<T> {
        self.map_err(|e| e.extend())
    }
}

pub(crate) fn services<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a Arc<AppServices>> {
    ctx.data::<Arc<AppServices>>()
}

/// The caller's session; resolvers other than `signup`, `login` and `me` require one.
pub(crate) fn session<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a Session> {
    ctx.data_opt::<Session>().ok_or_else(|| ApiError::Unauthenticated.extend())
}

pub(crate) fn parse_id<T: FromStr>(id: &ID, what: &str) -> async_graphql::Result<T> {
    id.as_str()
        .parse()
        .map_err(|_| ApiError::validation(format!("invalid {what} id: {}", id.as_str())).extend())
}

pub(crate) fn parse_opt_id<T: FromStr>(id: Option<&ID>, what: &str) -> async_graphql::Result<Option<T>> {
    id.map(|id| parse_id(id, what)).transpose()
}
