//! Snapshot contract used by the audit trail.

use serde_json::Value as JsonValue;

/// A record whose state changes are written to the audit log.
///
/// The audit layer diffs the snapshot taken before a command with the snapshot taken
/// after it, so snapshots must be deterministic for unchanged state.
pub trait Auditable {
    /// Stable entity type name stored in audit entries (e.g. `"customer"`).
    const ENTITY_TYPE: &'static str;

    /// JSON view of the current state, or `None` when the record does not exist
    /// (not created yet, or deleted).
    fn audit_snapshot(&self) -> Option<JsonValue>;
}
