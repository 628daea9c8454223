use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are `module.action` strings (e.g. `"customers.write"`).
/// `"*"` grants everything, `"module.*"` every action of one module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn from_parts(module: &str, action: &str) -> Self {
        if module == "*" {
            return Self::WILDCARD;
        }
        Self(Cow::Owned(format!("{module}.{action}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    pub fn module(&self) -> &str {
        self.as_str().split('.').next().unwrap_or_default()
    }

    /// Whether holding `self` satisfies a check for `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        if self.is_wildcard() || self == required {
            return true;
        }
        match self.as_str().strip_suffix(".*") {
            Some(module) => required.module() == module,
            None => false,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Module names that can appear in a role's permission dict.
pub const MODULES: &[&str] = &[
    "tenant",
    "users",
    "roles",
    "customers",
    "products",
    "contracts",
    "invoices",
    "imported_invoices",
    "banking",
    "audit",
];

/// Actions understood by every module.
pub const ACTIONS: &[&str] = &["read", "write"];

pub mod names {
    use super::Permission;

    pub const TENANT_WRITE: Permission = Permission::from_static("tenant.write");
    pub const USERS_READ: Permission = Permission::from_static("users.read");
    pub const USERS_WRITE: Permission = Permission::from_static("users.write");
    pub const ROLES_READ: Permission = Permission::from_static("roles.read");
    pub const ROLES_WRITE: Permission = Permission::from_static("roles.write");
    pub const CUSTOMERS_READ: Permission = Permission::from_static("customers.read");
    pub const CUSTOMERS_WRITE: Permission = Permission::from_static("customers.write");
    pub const PRODUCTS_READ: Permission = Permission::from_static("products.read");
    pub const PRODUCTS_WRITE: Permission = Permission::from_static("products.write");
    pub const CONTRACTS_READ: Permission = Permission::from_static("contracts.read");
    pub const CONTRACTS_WRITE: Permission = Permission::from_static("contracts.write");
    pub const INVOICES_READ: Permission = Permission::from_static("invoices.read");
    pub const INVOICES_WRITE: Permission = Permission::from_static("invoices.write");
    pub const IMPORTED_INVOICES_READ: Permission = Permission::from_static("imported_invoices.read");
    pub const IMPORTED_INVOICES_WRITE: Permission =
        Permission::from_static("imported_invoices.write");
    pub const BANKING_READ: Permission = Permission::from_static("banking.read");
    pub const BANKING_WRITE: Permission = Permission::from_static("banking.write");
    pub const AUDIT_READ: Permission = Permission::from_static("audit.read");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_wildcard_grants_only_its_module() {
        let p = Permission::new("banking.*");
        assert!(p.grants(&names::BANKING_WRITE));
        assert!(!p.grants(&names::CUSTOMERS_READ));
    }

    #[test]
    fn global_wildcard_grants_everything() {
        assert!(Permission::WILDCARD.grants(&names::AUDIT_READ));
        assert!(!names::AUDIT_READ.grants(&names::BANKING_READ));
    }
}
