use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{Aggregate, AggregateRoot, DomainError, OrganizationId, UserId};
use shopledger_events::Event;

use crate::MemberRole;

shopledger_core::aggregate_id_newtype!(
    /// A shop, warehouse or other physical location of an organization.
    LocationId
);

shopledger_core::aggregate_id_newtype!(
    /// A product or expense category.
    CategoryId
);

/// Which list a category belongs to. Names are unique per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Product,
    Expense,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub display_name: String,
    pub role: MemberRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub location_id: LocationId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub category_id: CategoryId,
    pub kind: CategoryKind,
    pub name: String,
}

/// Canonical form used for per-organization uniqueness of names.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Aggregate root: Organization. Its stream id is the organization id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    id: OrganizationId,
    name: String,
    members: BTreeMap<UserId, Member>,
    locations: Vec<Location>,
    categories: Vec<Category>,
    version: u64,
    created: bool,
}

impl Organization {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrganizationId) -> Self {
        Self {
            id,
            name: String::new(),
            members: BTreeMap::new(),
            locations: Vec::new(),
            categories: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member(&self, user_id: UserId) -> Option<&Member> {
        self.members.get(&user_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn has_location(&self, location_id: LocationId) -> bool {
        self.locations.iter().any(|l| l.location_id == location_id)
    }

    pub fn has_category(&self, kind: CategoryKind, category_id: CategoryId) -> bool {
        self.categories
            .iter()
            .any(|c| c.kind == kind && c.category_id == category_id)
    }

    fn owner_count(&self) -> usize {
        self.members
            .values()
            .filter(|m| m.role == MemberRole::Owner)
            .count()
    }
}

impl AggregateRoot for Organization {
    type Id = OrganizationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOrganization. The creating user becomes its first owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub organization_id: OrganizationId,
    pub name: String,
    pub owner: UserId,
    pub owner_name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMember {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub display_name: String,
    pub role: MemberRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMemberRole {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMember {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLocation {
    pub organization_id: OrganizationId,
    pub location_id: LocationId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCategory {
    pub organization_id: OrganizationId,
    pub category_id: CategoryId,
    pub kind: CategoryKind,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrganizationCommand {
    CreateOrganization(CreateOrganization),
    AddMember(AddMember),
    ChangeMemberRole(ChangeMemberRole),
    RemoveMember(RemoveMember),
    AddLocation(AddLocation),
    AddCategory(AddCategory),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationCreated {
    pub organization_id: OrganizationId,
    pub name: String,
    pub owner: UserId,
    pub owner_name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAdded {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub display_name: String,
    pub role: MemberRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRoleChanged {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub from: MemberRole,
    pub to: MemberRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRemoved {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationAdded {
    pub organization_id: OrganizationId,
    pub location_id: LocationId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryAdded {
    pub organization_id: OrganizationId,
    pub category_id: CategoryId,
    pub kind: CategoryKind,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrganizationEvent {
    OrganizationCreated(OrganizationCreated),
    MemberAdded(MemberAdded),
    MemberRoleChanged(MemberRoleChanged),
    MemberRemoved(MemberRemoved),
    LocationAdded(LocationAdded),
    CategoryAdded(CategoryAdded),
}

impl Event for OrganizationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrganizationEvent::OrganizationCreated(_) => "organization.created",
            OrganizationEvent::MemberAdded(_) => "organization.member_added",
            OrganizationEvent::MemberRoleChanged(_) => "organization.member_role_changed",
            OrganizationEvent::MemberRemoved(_) => "organization.member_removed",
            OrganizationEvent::LocationAdded(_) => "organization.location_added",
            OrganizationEvent::CategoryAdded(_) => "organization.category_added",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrganizationEvent::OrganizationCreated(e) => e.occurred_at,
            OrganizationEvent::MemberAdded(e) => e.occurred_at,
            OrganizationEvent::MemberRoleChanged(e) => e.occurred_at,
            OrganizationEvent::MemberRemoved(e) => e.occurred_at,
            OrganizationEvent::LocationAdded(e) => e.occurred_at,
            OrganizationEvent::CategoryAdded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Organization {
    type Command = OrganizationCommand;
    type Event = OrganizationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrganizationEvent::OrganizationCreated(e) => {
                self.id = e.organization_id;
                self.name = e.name.clone();
                self.members.clear();
                self.members.insert(
                    e.owner,
                    Member {
                        user_id: e.owner,
                        display_name: e.owner_name.clone(),
                        role: MemberRole::Owner,
                    },
                );
                self.created = true;
            }
            OrganizationEvent::MemberAdded(e) => {
                self.members.insert(
                    e.user_id,
                    Member {
                        user_id: e.user_id,
                        display_name: e.display_name.clone(),
                        role: e.role,
                    },
                );
            }
            OrganizationEvent::MemberRoleChanged(e) => {
                if let Some(m) = self.members.get_mut(&e.user_id) {
                    m.role = e.to;
                }
            }
            OrganizationEvent::MemberRemoved(e) => {
                self.members.remove(&e.user_id);
            }
            OrganizationEvent::LocationAdded(e) => {
                self.locations.push(Location {
                    location_id: e.location_id,
                    name: e.name.clone(),
                });
            }
            OrganizationEvent::CategoryAdded(e) => {
                self.categories.push(Category {
                    category_id: e.category_id,
                    kind: e.kind,
                    name: e.name.clone(),
                });
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrganizationCommand::CreateOrganization(cmd) => self.handle_create(cmd),
            OrganizationCommand::AddMember(cmd) => self.handle_add_member(cmd),
            OrganizationCommand::ChangeMemberRole(cmd) => self.handle_change_role(cmd),
            OrganizationCommand::RemoveMember(cmd) => self.handle_remove_member(cmd),
            OrganizationCommand::AddLocation(cmd) => self.handle_add_location(cmd),
            OrganizationCommand::AddCategory(cmd) => self.handle_add_category(cmd),
        }
    }
}

impl Organization {
    fn ensure_created(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != organization_id {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateOrganization) -> Result<Vec<OrganizationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("organization already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![OrganizationEvent::OrganizationCreated(OrganizationCreated {
            organization_id: cmd.organization_id,
            name: cmd.name.trim().to_string(),
            owner: cmd.owner,
            owner_name: cmd.owner_name.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_member(&self, cmd: &AddMember) -> Result<Vec<OrganizationEvent>, DomainError> {
        self.ensure_created(cmd.organization_id)?;

        if self.members.contains_key(&cmd.user_id) {
            return Err(DomainError::duplicate("member", &cmd.user_id.to_string()));
        }
        if cmd.display_name.trim().is_empty() {
            return Err(DomainError::validation("display_name cannot be empty"));
        }

        Ok(vec![OrganizationEvent::MemberAdded(MemberAdded {
            organization_id: cmd.organization_id,
            user_id: cmd.user_id,
            display_name: cmd.display_name.trim().to_string(),
            role: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_role(&self, cmd: &ChangeMemberRole) -> Result<Vec<OrganizationEvent>, DomainError> {
        self.ensure_created(cmd.organization_id)?;

        let member = self.members.get(&cmd.user_id).ok_or_else(DomainError::not_found)?;
        if member.role == cmd.role {
            return Ok(vec![]);
        }
        if member.role == MemberRole::Owner && self.owner_count() == 1 {
            return Err(DomainError::invariant("cannot demote the last owner"));
        }

        Ok(vec![OrganizationEvent::MemberRoleChanged(MemberRoleChanged {
            organization_id: cmd.organization_id,
            user_id: cmd.user_id,
            from: member.role,
            to: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_member(&self, cmd: &RemoveMember) -> Result<Vec<OrganizationEvent>, DomainError> {
        self.ensure_created(cmd.organization_id)?;

        let member = self.members.get(&cmd.user_id).ok_or_else(DomainError::not_found)?;
        if member.role == MemberRole::Owner && self.owner_count() == 1 {
            return Err(DomainError::invariant("cannot remove the last owner"));
        }

        Ok(vec![OrganizationEvent::MemberRemoved(MemberRemoved {
            organization_id: cmd.organization_id,
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_location(&self, cmd: &AddLocation) -> Result<Vec<OrganizationEvent>, DomainError> {
        self.ensure_created(cmd.organization_id)?;

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("location name cannot be empty"));
        }
        if self.has_location(cmd.location_id) {
            return Err(DomainError::conflict("location id already in use"));
        }
        let wanted = normalize_name(name);
        if self.locations.iter().any(|l| normalize_name(&l.name) == wanted) {
            return Err(DomainError::duplicate("location", name));
        }

        Ok(vec![OrganizationEvent::LocationAdded(LocationAdded {
            organization_id: cmd.organization_id,
            location_id: cmd.location_id,
            name: name.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_category(&self, cmd: &AddCategory) -> Result<Vec<OrganizationEvent>, DomainError> {
        self.ensure_created(cmd.organization_id)?;

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("category name cannot be empty"));
        }
        if self.categories.iter().any(|c| c.category_id == cmd.category_id) {
            return Err(DomainError::conflict("category id already in use"));
        }
        let wanted = normalize_name(name);
        if self
            .categories
            .iter()
            .any(|c| c.kind == cmd.kind && normalize_name(&c.name) == wanted)
        {
            return Err(DomainError::duplicate("category", name));
        }

        Ok(vec![OrganizationEvent::CategoryAdded(CategoryAdded {
            organization_id: cmd.organization_id,
            category_id: cmd.category_id,
            kind: cmd.kind,
            name: name.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn run(org: &mut Organization, cmd: OrganizationCommand) -> Result<Vec<OrganizationEvent>, DomainError> {
        let events = org.handle(&cmd)?;
        for e in &events {
            org.apply(e);
        }
        Ok(events)
    }

    fn created() -> (Organization, UserId) {
        let id = OrganizationId::new();
        let owner = UserId::new();
        let mut org = Organization::empty(id);
        run(
            &mut org,
            OrganizationCommand::CreateOrganization(CreateOrganization {
                organization_id: id,
                name: "Corner Shop".into(),
                owner,
                owner_name: "Ada".into(),
                occurred_at: now(),
            }),
        )
        .unwrap();
        (org, owner)
    }

    fn add_category(org: &mut Organization, kind: CategoryKind, name: &str) -> Result<Vec<OrganizationEvent>, DomainError> {
        let organization_id = *org.id();
        run(
            org,
            OrganizationCommand::AddCategory(AddCategory {
                organization_id,
                category_id: CategoryId::generate(),
                kind,
                name: name.into(),
                occurred_at: now(),
            }),
        )
    }

    #[test]
    fn creator_becomes_owner() {
        let (org, owner) = created();
        assert_eq!(org.member(owner).unwrap().role, MemberRole::Owner);
        assert_eq!(org.version(), 1);
    }

    #[test]
    fn duplicate_category_name_fails_with_uniqueness_error() {
        let (mut org, _) = created();
        add_category(&mut org, CategoryKind::Expense, "Rent").unwrap();

        let err = add_category(&mut org, CategoryKind::Expense, "  rent ").unwrap_err();
        assert_eq!(err, DomainError::duplicate("category", "rent"));
    }

    #[test]
    fn same_category_name_is_allowed_across_kinds() {
        let (mut org, _) = created();
        add_category(&mut org, CategoryKind::Expense, "Supplies").unwrap();
        assert!(add_category(&mut org, CategoryKind::Product, "Supplies").is_ok());
        assert_eq!(org.categories().len(), 2);
    }

    #[test]
    fn member_can_only_join_once() {
        let (mut org, owner) = created();
        let organization_id = *org.id();
        let err = run(
            &mut org,
            OrganizationCommand::AddMember(AddMember {
                organization_id,
                user_id: owner,
                display_name: "Ada again".into(),
                role: MemberRole::Cashier,
                occurred_at: now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Duplicate(_)));
    }

    #[test]
    fn last_owner_cannot_be_demoted_or_removed() {
        let (mut org, owner) = created();
        let organization_id = *org.id();

        let err = run(
            &mut org,
            OrganizationCommand::ChangeMemberRole(ChangeMemberRole {
                organization_id,
                user_id: owner,
                role: MemberRole::Manager,
                occurred_at: now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let err = run(
            &mut org,
            OrganizationCommand::RemoveMember(RemoveMember {
                organization_id,
                user_id: owner,
                occurred_at: now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn owner_can_step_down_once_another_owner_exists() {
        let (mut org, owner) = created();
        let organization_id = *org.id();
        let second = UserId::new();
        run(
            &mut org,
            OrganizationCommand::AddMember(AddMember {
                organization_id,
                user_id: second,
                display_name: "Grace".into(),
                role: MemberRole::Owner,
                occurred_at: now(),
            }),
        )
        .unwrap();

        run(
            &mut org,
            OrganizationCommand::ChangeMemberRole(ChangeMemberRole {
                organization_id,
                user_id: owner,
                role: MemberRole::Accountant,
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(org.member(owner).unwrap().role, MemberRole::Accountant);
    }

    #[test]
    fn location_names_are_unique() {
        let (mut org, _) = created();
        let organization_id = *org.id();
        let add = |name: &str| {
            OrganizationCommand::AddLocation(AddLocation {
                organization_id,
                location_id: LocationId::generate(),
                name: name.into(),
                occurred_at: now(),
            })
        };
        run(&mut org, add("Main Street")).unwrap();
        assert!(matches!(
            run(&mut org, add("MAIN STREET")),
            Err(DomainError::Duplicate(_))
        ));
    }

    #[test]
    fn commands_before_creation_are_not_found() {
        let org = Organization::empty(OrganizationId::new());
        let err = org
            .handle(&OrganizationCommand::AddLocation(AddLocation {
                organization_id: *org.id(),
                location_id: LocationId::generate(),
                name: "Depot".into(),
                occurred_at: now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    proptest! {
        #[test]
        fn category_uniqueness_ignores_case_and_padding(
            name in "[A-Za-z]{1,12}",
            pad_left in 0usize..3,
            pad_right in 0usize..3,
            upper in any::<bool>(),
        ) {
            let (mut org, _) = created();
            add_category(&mut org, CategoryKind::Product, &name).unwrap();

            let variant = if upper { name.to_uppercase() } else { name.to_lowercase() };
            let padded = format!("{}{}{}", " ".repeat(pad_left), variant, " ".repeat(pad_right));
            let result = add_category(&mut org, CategoryKind::Product, &padded);
            prop_assert!(matches!(result, Err(DomainError::Duplicate(_))));
        }
    }
}
