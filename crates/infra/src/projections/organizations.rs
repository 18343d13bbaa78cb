use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use shopledger_core::{OrganizationId, UserId};
use shopledger_events::EventEnvelope;
use shopledger_organization::{
    Category, CategoryId, CategoryKind, Location, LocationId, Member, MemberRole, OrganizationEvent,
};

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_scope};
use crate::read_model::OrgStore;
use crate::streams;

/// Organization profile with members, locations and categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationReadModel {
    pub organization_id: OrganizationId,
    pub name: String,
    pub members: Vec<Member>,
    pub locations: Vec<Location>,
    pub categories: Vec<Category>,
    pub created_at: DateTime<Utc>,
}

impl OrganizationReadModel {
    pub fn member(&self, user_id: UserId) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn has_location(&self, location_id: LocationId) -> bool {
        self.locations.iter().any(|l| l.location_id == location_id)
    }

    pub fn has_category(&self, kind: CategoryKind, category_id: CategoryId) -> bool {
        self.categories
            .iter()
            .any(|c| c.kind == kind && c.category_id == category_id)
    }
}

/// One record per organization, keyed by the organization id.
#[derive(Debug)]
pub struct OrganizationsProjection<S>
where
    S: OrgStore<OrganizationId, OrganizationReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> OrganizationsProjection<S>
where
    S: OrgStore<OrganizationId, OrganizationReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, organization_id: OrganizationId) -> Option<OrganizationReadModel> {
        self.store.get(organization_id, &organization_id)
    }

    fn apply_event(&self, organization_id: OrganizationId, event: OrganizationEvent) {
        if let OrganizationEvent::OrganizationCreated(e) = &event {
            self.store.upsert(
                organization_id,
                organization_id,
                OrganizationReadModel {
                    organization_id,
                    name: e.name.clone(),
                    members: vec![Member {
                        user_id: e.owner,
                        display_name: e.owner_name.clone(),
                        role: MemberRole::Owner,
                    }],
                    locations: Vec::new(),
                    categories: Vec::new(),
                    created_at: e.occurred_at,
                },
            );
            return;
        }

        let Some(mut rm) = self.store.get(organization_id, &organization_id) else {
            tracing::warn!(%organization_id, "organization event before creation; skipped");
            return;
        };

        match event {
            OrganizationEvent::OrganizationCreated(_) => {}
            OrganizationEvent::MemberAdded(e) => rm.members.push(Member {
                user_id: e.user_id,
                display_name: e.display_name,
                role: e.role,
            }),
            OrganizationEvent::MemberRoleChanged(e) => {
                if let Some(m) = rm.members.iter_mut().find(|m| m.user_id == e.user_id) {
                    m.role = e.to;
                }
            }
            OrganizationEvent::MemberRemoved(e) => rm.members.retain(|m| m.user_id != e.user_id),
            OrganizationEvent::LocationAdded(e) => rm.locations.push(Location {
                location_id: e.location_id,
                name: e.name,
            }),
            OrganizationEvent::CategoryAdded(e) => rm.categories.push(Category {
                category_id: e.category_id,
                kind: e.kind,
                name: e.name,
            }),
        }

        self.store.upsert(organization_id, organization_id, rm);
    }
}

fn event_organization(event: &OrganizationEvent) -> OrganizationId {
    match event {
        OrganizationEvent::OrganizationCreated(e) => e.organization_id,
        OrganizationEvent::MemberAdded(e) => e.organization_id,
        OrganizationEvent::MemberRoleChanged(e) => e.organization_id,
        OrganizationEvent::MemberRemoved(e) => e.organization_id,
        OrganizationEvent::LocationAdded(e) => e.organization_id,
        OrganizationEvent::CategoryAdded(e) => e.organization_id,
    }
}

impl<S> Projection for OrganizationsProjection<S>
where
    S: OrgStore<OrganizationId, OrganizationReadModel>,
{
    fn name(&self) -> &'static str {
        "organizations"
    }

    fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == streams::ORGANIZATION
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if !self.handles(envelope.aggregate_type()) {
            return Ok(());
        }

        self.cursors.apply_once(envelope, || {
            let event: OrganizationEvent = decode(envelope)?;
            let organization_id = event_organization(&event);
            ensure_scope(envelope, organization_id, organization_id.into())?;
            self.apply_event(organization_id, event);
            Ok(())
        })?;

        Ok(())
    }

    fn reset(&self, organization_id: OrganizationId) {
        self.cursors.reset_organization(organization_id);
        self.store.clear_organization(organization_id);
    }
}
