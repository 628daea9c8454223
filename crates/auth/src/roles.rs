use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use kontor_core::DomainError;

use crate::permissions::{ACTIONS, MODULES, Permission};

/// Role name used for RBAC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{module: [action, ...]}` as stored on a role.
pub type PermissionDict = BTreeMap<String, Vec<String>>;

/// A tenant-scoped role and the permissions it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub name: Role,
    pub description: Option<String>,
    pub permissions: PermissionDict,
}

impl RoleDefinition {
    /// Validate name and dict; unknown modules or actions are rejected.
    pub fn new(
        name: &str,
        description: Option<String>,
        permissions: PermissionDict,
    ) -> Result<Self, DomainError> {
        let name = name.trim().to_lowercase();
        if name.is_empty() || name.len() > 64 {
            return Err(DomainError::validation("role name must be 1..=64 characters"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DomainError::validation(format!("invalid role name '{name}'")));
        }

        for (module, actions) in &permissions {
            if module != "*" && !MODULES.contains(&module.as_str()) {
                return Err(DomainError::validation(format!("unknown module '{module}'")));
            }
            for action in actions {
                if action != "*" && !ACTIONS.contains(&action.as_str()) {
                    return Err(DomainError::validation(format!(
                        "unknown action '{action}' for module '{module}'"
                    )));
                }
            }
        }

        Ok(Self {
            name: Role::new(name),
            description,
            permissions,
        })
    }

    /// Flatten the dict into `module.action` permissions.
    pub fn flatten(&self) -> BTreeSet<Permission> {
        flatten_dict(&self.permissions)
    }
}

pub fn flatten_dict(dict: &PermissionDict) -> BTreeSet<Permission> {
    let mut out = BTreeSet::new();
    for (module, actions) in dict {
        for action in actions {
            out.insert(Permission::from_parts(module, action));
        }
    }
    out
}

/// Effective permissions of a set of role names against the tenant's role definitions.
///
/// Unknown role names grant nothing.
pub fn resolve_permissions(roles: &[Role], definitions: &[RoleDefinition]) -> Vec<Permission> {
    let mut out = BTreeSet::new();
    for role in roles {
        if let Some(def) = definitions.iter().find(|d| &d.name == role) {
            out.extend(def.flatten());
        }
    }
    out.into_iter().collect()
}

fn dict(entries: &[(&str, &[&str])]) -> PermissionDict {
    entries
        .iter()
        .map(|(m, a)| (m.to_string(), a.iter().map(|s| s.to_string()).collect()))
        .collect()
}

/// Roles every new tenant starts with.
pub fn default_roles() -> Vec<RoleDefinition> {
    const RW: &[&str] = &["read", "write"];
    const R: &[&str] = &["read"];

    vec![
        RoleDefinition {
            name: Role::ADMIN,
            description: Some("Full access".to_string()),
            permissions: dict(&[("*", &["*"])]),
        },
        RoleDefinition {
            name: Role::new("manager"),
            description: Some("Runs day-to-day business".to_string()),
            permissions: dict(&[
                ("users", R),
                ("roles", R),
                ("customers", RW),
                ("products", RW),
                ("contracts", RW),
                ("invoices", RW),
                ("imported_invoices", RW),
                ("banking", R),
                ("audit", R),
            ]),
        },
        RoleDefinition {
            name: Role::new("accountant"),
            description: Some("Invoicing and banking".to_string()),
            permissions: dict(&[
                ("customers", R),
                ("products", R),
                ("contracts", R),
                ("invoices", RW),
                ("imported_invoices", RW),
                ("banking", RW),
                ("audit", R),
            ]),
        },
        RoleDefinition {
            name: Role::new("viewer"),
            description: Some("Read-only".to_string()),
            permissions: dict(&[
                ("customers", R),
                ("products", R),
                ("contracts", R),
                ("invoices", R),
                ("imported_invoices", R),
                ("banking", R),
            ]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::names;

    #[test]
    fn dict_flattens_to_module_action_strings() {
        let mut d = PermissionDict::new();
        d.insert("customers".into(), vec!["read".into(), "write".into()]);
        d.insert("banking".into(), vec!["read".into()]);
        let role = RoleDefinition::new("Sales", None, d).unwrap();

        assert_eq!(role.name.as_str(), "sales");
        let perms: Vec<String> = role.flatten().iter().map(|p| p.to_string()).collect();
        assert_eq!(perms, vec!["banking.read", "customers.read", "customers.write"]);
    }

    #[test]
    fn unknown_modules_and_actions_are_rejected() {
        let mut d = PermissionDict::new();
        d.insert("payroll".into(), vec!["read".into()]);
        assert!(RoleDefinition::new("x", None, d).is_err());

        let mut d = PermissionDict::new();
        d.insert("customers".into(), vec!["approve".into()]);
        assert!(RoleDefinition::new("x", None, d).is_err());
    }

    #[test]
    fn default_roles_resolve() {
        let defs = default_roles();
        let admin = resolve_permissions(&[Role::ADMIN], &defs);
        assert_eq!(admin, vec![Permission::WILDCARD]);

        let viewer = resolve_permissions(&[Role::new("viewer")], &defs);
        assert!(viewer.contains(&names::INVOICES_READ));
        assert!(!viewer.contains(&names::INVOICES_WRITE));

        assert!(resolve_permissions(&[Role::new("ghost")], &defs).is_empty());
    }
}
