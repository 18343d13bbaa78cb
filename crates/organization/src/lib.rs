//! Organization domain module (event-sourced).
//!
//! The organization is the tenant boundary. Its aggregate owns membership,
//! locations (shops, warehouses) and the product/expense category lists.

pub mod organization;
pub mod role;

pub use organization::{
    AddCategory, AddLocation, AddMember, Category, CategoryAdded, CategoryId, CategoryKind,
    ChangeMemberRole, CreateOrganization, Location, LocationAdded, LocationId, Member,
    MemberAdded, MemberRemoved, MemberRoleChanged, Organization, OrganizationCommand,
    OrganizationCreated, OrganizationEvent, RemoveMember, normalize_name,
};
pub use role::MemberRole;
