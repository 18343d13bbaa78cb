use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role name as carried in tokens (e.g. `"cashier"`).
///
/// Opaque at this layer; [`crate::role_permissions`] gives it meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trimmed, lowercase form used for policy lookups (`" Manager"` → `"manager"`).
    pub fn normalized(&self) -> String {
        self.0.trim().to_ascii_lowercase()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
