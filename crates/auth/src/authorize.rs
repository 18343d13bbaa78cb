use thiserror::Error;

use shopledger_core::{OrganizationId, UserId};

use crate::{Permission, Role};

/// A user's grants inside one organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationMembership {
    pub organization_id: OrganizationId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub active_organization_id: OrganizationId,
    pub membership: OrganizationMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("organization mismatch")]
    OrganizationMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Command-side authorization contract, checked before dispatch.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Authorize a principal within its active organization. Pure policy check.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_organization_id != principal.membership.organization_id {
        return Err(AuthzError::OrganizationMismatch);
    }

    if principal.membership.permissions.iter().any(|p| p.grants(required)) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
