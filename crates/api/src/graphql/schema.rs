use std::sync::Arc;

use async_graphql::{EmptySubscription, Schema};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{Extension, response::Html};

use crate::app::services::AppServices;
use crate::context::Session;
use crate::graphql::resolvers::{Mutation, Query};

/// The complete GraphQL schema.
pub type KontorSchema = Schema<Query, Mutation, EmptySubscription>;

/// Build the schema around the shared services.
pub fn build_schema(services: Arc<AppServices>) -> KontorSchema {
    Schema::build(Query, Mutation, EmptySubscription)
        .data(services)
        .limit_depth(12)
        .finish()
}

/// `POST /graphql`. The session (if the optional auth middleware found a token) travels
/// as request data.
pub async fn graphql_handler(
    Extension(schema): Extension<KontorSchema>,
    session: Option<Extension<Session>>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    let mut req = req.into_inner();
    if let Some(Extension(session)) = session {
        req = req.data(session);
    }
    schema.execute(req).await.into()
}

/// `GET /graphql`: the GraphiQL IDE.
pub async fn graphiql() -> Html<String> {
    Html(async_graphql::http::GraphiQLSource::build().endpoint("/graphql").finish())
}
