//! API-side authorization guard for commands.
//!
//! This enforces authorization at the command boundary (before dispatch),
//! while keeping domain aggregates and infra auth-agnostic.

use shopledger_auth::{
    AuthzError, CommandAuthorization, OrganizationMembership, Permission, Principal, authorize,
    role_permissions,
};

use crate::context::{OrganizationContext, PrincipalContext};

/// Check authorization for a command in the current request context.
///
/// This is intended to be called **before** dispatching a command.
pub fn authorize_command<C: CommandAuthorization>(
    organization: &OrganizationContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    for perm in command.required_permissions() {
        authorize_permission(organization, principal, perm)?;
    }
    Ok(())
}

/// Check a single permission, e.g. for queries.
pub fn authorize_permission(
    organization: &OrganizationContext,
    principal: &PrincipalContext,
    permission: &Permission,
) -> Result<(), AuthzError> {
    let membership = OrganizationMembership {
        organization_id: organization.organization_id(),
        roles: principal.roles().to_vec(),
        permissions: principal
            .roles()
            .iter()
            .flat_map(|r| role_permissions(&r.normalized()))
            .collect(),
    };

    let principal = Principal {
        user_id: principal.user_id(),
        active_organization_id: organization.organization_id(),
        membership,
    };

    authorize(&principal, permission)
}
