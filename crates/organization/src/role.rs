use core::str::FromStr;

use serde::{Deserialize, Serialize};

use shopledger_core::DomainError;

/// Role of a member within one organization.
///
/// The lowercase names are the role strings carried in access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Manager,
    Cashier,
    Accountant,
    Staff,
}

impl MemberRole {
    pub const ALL: [MemberRole; 6] = [
        MemberRole::Owner,
        MemberRole::Admin,
        MemberRole::Manager,
        MemberRole::Cashier,
        MemberRole::Accountant,
        MemberRole::Staff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Manager => "manager",
            MemberRole::Cashier => "cashier",
            MemberRole::Accountant => "accountant",
            MemberRole::Staff => "staff",
        }
    }
}

impl core::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        MemberRole::ALL
            .into_iter()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| DomainError::validation(format!("unknown member role '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_role_names() {
        for role in MemberRole::ALL {
            assert_eq!(role.as_str().parse::<MemberRole>().unwrap(), role);
        }
        assert_eq!(" Manager ".parse::<MemberRole>().unwrap(), MemberRole::Manager);
    }

    #[test]
    fn rejects_unknown_roles() {
        assert!(matches!(
            "auditor".parse::<MemberRole>(),
            Err(DomainError::Validation(_))
        ));
    }
}
