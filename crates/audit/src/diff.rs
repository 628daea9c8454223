//! Field-level diffing of JSON snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entry::AuditAction;

/// Fields that change on every write and carry no audit value.
const IGNORED_FIELDS: &[&str] = &["version", "updated_at"];

/// Fields whose values must never reach the audit log.
const MASKED_FIELDS: &[&str] = &["password_hash", "password"];

pub const MASKED_VALUE: &str = "***";

/// Old and new value of one field (`null` when absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: JsonValue,
    pub new: JsonValue,
}

/// Changes keyed by dot-separated field path, sorted for stable output.
pub type Changes = BTreeMap<String, FieldChange>;

/// Diff two snapshots of the same record.
///
/// - `None → Some` is a create: every field with `old = null`.
/// - `Some → None` is a delete: every field with `new = null`.
/// - `Some → Some` is an update with only the changed fields.
///
/// Returns `None` when nothing worth recording changed.
pub fn diff_snapshots(
    before: Option<&JsonValue>,
    after: Option<&JsonValue>,
) -> Option<(AuditAction, Changes)> {
    match (before, after) {
        (None, None) => None,
        (None, Some(after)) => {
            let changes: Changes = flatten(after)
                .into_iter()
                .map(|(k, v)| {
                    let c = change(&k, JsonValue::Null, v);
                    (k, c)
                })
                .collect();
            Some((AuditAction::Create, changes))
        }
        (Some(before), None) => {
            let changes: Changes = flatten(before)
                .into_iter()
                .map(|(k, v)| {
                    let c = change(&k, v, JsonValue::Null);
                    (k, c)
                })
                .collect();
            Some((AuditAction::Delete, changes))
        }
        (Some(before), Some(after)) => {
            let old = flatten(before);
            let new = flatten(after);

            let mut changes = Changes::new();
            for key in old.keys().chain(new.keys()) {
                if changes.contains_key(key) {
                    continue;
                }
                let o = old.get(key).cloned().unwrap_or(JsonValue::Null);
                let n = new.get(key).cloned().unwrap_or(JsonValue::Null);
                if o != n {
                    changes.insert(key.clone(), change(key, o, n));
                }
            }

            if changes.is_empty() {
                None
            } else {
                Some((AuditAction::Update, changes))
            }
        }
    }
}

fn flatten(value: &JsonValue) -> BTreeMap<String, JsonValue> {
    let mut out = BTreeMap::new();
    match value {
        JsonValue::Object(_) => flatten_into(value, "", &mut out),
        other => {
            out.insert("value".to_string(), other.clone());
        }
    }
    out
}

fn flatten_into(value: &JsonValue, prefix: &str, out: &mut BTreeMap<String, JsonValue>) {
    let JsonValue::Object(map) = value else {
        out.insert(prefix.to_string(), value.clone());
        return;
    };

    if map.is_empty() && !prefix.is_empty() {
        out.insert(prefix.to_string(), value.clone());
        return;
    }

    for (key, child) in map {
        if IGNORED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match child {
            JsonValue::Object(_) => flatten_into(child, &path, out),
            _ => {
                out.insert(path, child.clone());
            }
        }
    }
}

fn is_masked(path: &str) -> bool {
    let field = path.rsplit('.').next().unwrap_or(path);
    MASKED_FIELDS.contains(&field)
}

// Comparison happens on raw values; only the recorded values are masked.
fn masked(path: &str, value: JsonValue) -> JsonValue {
    if is_masked(path) && !value.is_null() {
        JsonValue::String(MASKED_VALUE.to_string())
    } else {
        value
    }
}

fn change(path: &str, old: JsonValue, new: JsonValue) -> FieldChange {
    FieldChange {
        old: masked(path, old),
        new: masked(path, new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_lists_every_field_with_null_old_value() {
        let after = json!({"name": "Acme", "contact": {"email": "a@b.de"}});
        let (action, changes) = diff_snapshots(None, Some(&after)).unwrap();

        assert_eq!(action, AuditAction::Create);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["contact.email"].old, JsonValue::Null);
        assert_eq!(changes["contact.email"].new, json!("a@b.de"));
    }

    #[test]
    fn update_only_reports_changed_fields() {
        let before = json!({"name": "Acme", "city": "Berlin", "version": 1});
        let after = json!({"name": "Acme GmbH", "city": "Berlin", "version": 2});
        let (action, changes) = diff_snapshots(Some(&before), Some(&after)).unwrap();

        assert_eq!(action, AuditAction::Update);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes["name"].old, json!("Acme"));
        assert_eq!(changes["name"].new, json!("Acme GmbH"));
    }

    #[test]
    fn update_without_real_changes_is_skipped() {
        let before = json!({"name": "Acme", "updated_at": "2026-01-01T00:00:00Z"});
        let after = json!({"name": "Acme", "updated_at": "2026-02-01T00:00:00Z"});
        assert!(diff_snapshots(Some(&before), Some(&after)).is_none());
    }

    #[test]
    fn removed_and_added_keys_show_null_counterparts() {
        let before = json!({"iban": "DE02120300000000202051"});
        let after = json!({"vat_id": "DE123456789"});
        let (_, changes) = diff_snapshots(Some(&before), Some(&after)).unwrap();

        assert_eq!(changes["iban"].new, JsonValue::Null);
        assert_eq!(changes["vat_id"].old, JsonValue::Null);
    }

    #[test]
    fn arrays_are_compared_as_a_whole() {
        let before = json!({"roles": ["viewer"]});
        let after = json!({"roles": ["viewer", "manager"]});
        let (_, changes) = diff_snapshots(Some(&before), Some(&after)).unwrap();
        assert_eq!(changes["roles"].new, json!(["viewer", "manager"]));
    }

    #[test]
    fn changed_secrets_are_recorded_masked() {
        let before = json!({"email": "x@y.de", "password_hash": "aaa"});
        let after = json!({"email": "x@y.de", "password_hash": "bbb"});
        let (_, changes) = diff_snapshots(Some(&before), Some(&after)).unwrap();

        let change = &changes["password_hash"];
        assert_eq!(change.old, json!(MASKED_VALUE));
        assert_eq!(change.new, json!(MASKED_VALUE));
    }

    #[test]
    fn delete_lists_old_values() {
        let before = json!({"name": "Acme"});
        let (action, changes) = diff_snapshots(Some(&before), None).unwrap();
        assert_eq!(action, AuditAction::Delete);
        assert_eq!(changes["name"].new, JsonValue::Null);
    }
}
