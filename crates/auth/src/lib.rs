//! `shopledger-auth` — bearer-token validation and permission checks.
//!
//! Decoupled from HTTP and storage: the API layer extracts the token, this crate
//! decides who the caller is and what they may do.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod policy;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, OrganizationMembership, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator, sign_hs256};
pub use permissions::Permission;
pub use policy::{KNOWN_ROLES, role_permissions};
pub use roles::Role;
