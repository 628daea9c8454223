//! Ids, money, errors and the aggregate contract shared by every domain crate.
//!
//! No IO lives here.

pub mod aggregate;
pub mod auditable;
pub mod error;
pub mod iban;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use auditable::Auditable;
pub use error::{DomainError, DomainResult};
pub use iban::{Iban, normalize_iban};
pub use id::{AggregateId, TenantId, UserId};
pub use money::{Currency, Money, Quantity, basis_points_of, parse_amount_cents};
pub use value_object::ValueObject;
