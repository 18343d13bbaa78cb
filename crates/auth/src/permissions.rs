use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier of the form `<area>.<action>`, e.g. `"expenses.approve"`.
///
/// Grants may use wildcards: `"*"` (everything, for owners and admins) or
/// `"<area>.*"` (every action in one area).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// The part before the first dot (`"sales"` for `"sales.void"`).
    pub fn area(&self) -> &str {
        self.as_str().split_once('.').map_or(self.as_str(), |(area, _)| area)
    }

    /// Whether holding `self` satisfies `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        if self.is_wildcard() || self == required {
            return true;
        }
        match self.as_str().strip_suffix(".*") {
            Some(area) => required.area() == area,
            None => false,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_wildcard_covers_only_its_area() {
        let sales = Permission::new("sales.*");
        assert!(sales.grants(&Permission::new("sales.void")));
        assert!(!sales.grants(&Permission::new("salesx.void")));
        assert!(!sales.grants(&Permission::new("expenses.pay")));
    }

    #[test]
    fn exact_and_global_grants() {
        assert!(Permission::new("inventory.adjust").grants(&Permission::new("inventory.adjust")));
        assert!(!Permission::new("inventory.read").grants(&Permission::new("inventory.adjust")));
        assert!(Permission::new("*").grants(&Permission::new("workflows.manage")));
    }

    #[test]
    fn area_is_the_leading_segment() {
        assert_eq!(Permission::new("purchases.receive").area(), "purchases");
        assert_eq!(Permission::new("*").area(), "*");
    }
}
