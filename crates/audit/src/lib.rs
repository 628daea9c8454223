//! Audit trail: who changed what, as field-level diffs between record snapshots.
//!
//! The acting user is always passed explicitly by the caller.

pub mod diff;
pub mod entry;

pub use diff::{Changes, FieldChange, MASKED_VALUE, diff_snapshots};
pub use entry::{AuditAction, AuditEntry, AuditQuery};
