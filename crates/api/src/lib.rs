//! HTTP API: GraphQL schema, REST file endpoints, realtime stream and service wiring.

pub mod app;
pub mod authz;
pub mod context;
pub mod graphql;
pub mod middleware;
