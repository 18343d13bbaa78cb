//! Role → permission policy.
//!
//! Roles are the member roles of an organization. Permissions are dotted
//! `<area>.<action>` strings; `*` grants everything.

use crate::Permission;

/// Roles the policy knows about, highest privilege first.
pub const KNOWN_ROLES: &[&str] = &["owner", "admin", "manager", "cashier", "accountant", "staff"];

const MANAGER: &[&str] = &[
    "organization.read",
    "products.read",
    "products.write",
    "inventory.read",
    "inventory.receive",
    "inventory.adjust",
    "sales.read",
    "sales.create",
    "sales.void",
    "purchases.read",
    "purchases.write",
    "purchases.approve",
    "purchases.receive",
    "expenses.read",
    "expenses.create",
    "expenses.approve",
    "workflows.read",
    "notifications.read",
];

const ACCOUNTANT: &[&str] = &[
    "organization.read",
    "products.read",
    "inventory.read",
    "sales.read",
    "purchases.read",
    "purchases.approve",
    "expenses.read",
    "expenses.create",
    "expenses.approve",
    "expenses.pay",
    "workflows.read",
    "workflows.manage",
    "notifications.read",
];

const CASHIER: &[&str] = &[
    "organization.read",
    "products.read",
    "inventory.read",
    "sales.read",
    "sales.create",
    "expenses.read",
    "expenses.create",
    "notifications.read",
];

const STAFF: &[&str] = &[
    "organization.read",
    "products.read",
    "inventory.read",
    "expenses.read",
    "expenses.create",
    "notifications.read",
];

/// Permissions granted by a role. Unknown roles grant nothing.
pub fn role_permissions(role: &str) -> Vec<Permission> {
    let granted: &[&'static str] = match role {
        "owner" | "admin" => &["*"],
        "manager" => MANAGER,
        "accountant" => ACCOUNTANT,
        "cashier" => CASHIER,
        "staff" => STAFF,
        _ => &[],
    };
    granted.iter().map(|p| Permission::new(*p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has(role: &str, perm: &str) -> bool {
        role_permissions(role).iter().any(|p| p.as_str() == perm || p.is_wildcard())
    }

    #[test]
    fn owners_and_admins_get_wildcard() {
        assert!(role_permissions("owner")[0].is_wildcard());
        assert!(role_permissions("admin")[0].is_wildcard());
    }

    #[test]
    fn cashier_sells_but_cannot_void_or_approve() {
        assert!(has("cashier", "sales.create"));
        assert!(!has("cashier", "sales.void"));
        assert!(!has("cashier", "expenses.approve"));
    }

    #[test]
    fn accountant_manages_workflows_and_pays_expenses() {
        assert!(has("accountant", "workflows.manage"));
        assert!(has("accountant", "expenses.pay"));
        assert!(!has("accountant", "sales.create"));
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        assert!(role_permissions("viewer").is_empty());
    }
}
