use shopledger_auth::Role;
use shopledger_core::{OrganizationId, UserId};
use shopledger_organization::{MemberRole, Organization};

/// Organization context for a request.
///
/// This is immutable and must be present for all domain routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OrganizationContext {
    organization_id: OrganizationId,
}

impl OrganizationContext {
    pub fn new(organization_id: OrganizationId) -> Self {
        Self { organization_id }
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }
}

/// Principal context for a request (authenticated identity + roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Token roles that name a member role; unknown role strings are skipped.
    pub fn member_roles(&self) -> Vec<MemberRole> {
        self.roles.iter().filter_map(|r| r.as_str().parse().ok()).collect()
    }

    /// The same user carrying their current role in `organization`.
    ///
    /// `None` when the user is not a member.
    pub fn as_member(&self, organization: &Organization) -> Option<PrincipalContext> {
        organization
            .member(self.user_id)
            .map(|m| PrincipalContext::new(self.user_id, vec![Role::new(m.role.as_str())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shopledger_core::Aggregate;
    use shopledger_organization::{AddMember, CreateOrganization, OrganizationCommand};

    #[test]
    fn member_roles_skip_unknown_role_strings() {
        let principal = PrincipalContext::new(
            UserId::new(),
            vec![Role::new("Manager"), Role::new("auditor"), Role::new("cashier")],
        );
        assert_eq!(principal.member_roles(), vec![MemberRole::Manager, MemberRole::Cashier]);
    }

    fn organization_with_cashier(cashier: UserId) -> Organization {
        let organization_id = OrganizationId::new();
        let mut org = Organization::empty(organization_id);
        let commands = [
            OrganizationCommand::CreateOrganization(CreateOrganization {
                organization_id,
                name: "Corner Shop".into(),
                owner: UserId::new(),
                owner_name: "Ada".into(),
                occurred_at: Utc::now(),
            }),
            OrganizationCommand::AddMember(AddMember {
                organization_id,
                user_id: cashier,
                display_name: "Kofi".into(),
                role: MemberRole::Cashier,
                occurred_at: Utc::now(),
            }),
        ];
        for cmd in commands {
            for event in org.handle(&cmd).unwrap() {
                org.apply(&event);
            }
        }
        org
    }

    #[test]
    fn membership_role_replaces_token_roles() {
        let cashier = UserId::new();
        let org = organization_with_cashier(cashier);

        let principal = PrincipalContext::new(cashier, vec![Role::new("owner")]);
        let member = principal.as_member(&org).unwrap();
        assert_eq!(member.user_id(), cashier);
        assert_eq!(member.member_roles(), vec![MemberRole::Cashier]);

        let stranger = PrincipalContext::new(UserId::new(), vec![Role::new("admin")]);
        assert!(stranger.as_member(&org).is_none());
    }

    #[test]
    fn every_policy_role_is_a_member_role() {
        let principal = PrincipalContext::new(
            UserId::new(),
            shopledger_auth::KNOWN_ROLES.iter().map(|r| Role::new(*r)).collect(),
        );
        assert_eq!(principal.member_roles(), MemberRole::ALL.to_vec());
    }
}
