//! `kontor-auth`: authentication and authorization boundary.
//!
//! Decoupled from HTTP and storage. Holds the tenant and user aggregates, role
//! definitions with their permission dicts, JWT handling and password hashing.

pub mod claims;
pub mod jwt;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod tenant;
pub mod user;

pub use claims::{CLOCK_SKEW_SECS, JwtClaims, TokenValidationError};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use permissions::Permission;
pub use principal::{AuthzError, Principal};
pub use roles::{PermissionDict, Role, RoleDefinition, default_roles, resolve_permissions};
pub use tenant::{Tenant, TenantCommand, TenantEvent, TenantStatus};
pub use user::{User, UserCommand, UserEvent, UserStatus};
