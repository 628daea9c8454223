//! Append-only event store boundary.
//!
//! Tenant-scoped event streams without storage assumptions. The in-memory store backs
//! every aggregate; durable event storage is out of scope for this service.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
