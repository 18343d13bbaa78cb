use serde_json::Value as JsonValue;

use shopledger_core::OrganizationId;
use shopledger_events::EventEnvelope;
use shopledger_expenses::{WorkflowDefinition, WorkflowEvent, WorkflowId};
use shopledger_organization::normalize_name;

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_scope};
use crate::read_model::OrgStore;
use crate::streams;

/// Approval workflow definitions, the input to plan selection.
#[derive(Debug)]
pub struct WorkflowsProjection<S>
where
    S: OrgStore<WorkflowId, WorkflowDefinition>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> WorkflowsProjection<S>
where
    S: OrgStore<WorkflowId, WorkflowDefinition>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, organization_id: OrganizationId, workflow_id: &WorkflowId) -> Option<WorkflowDefinition> {
        self.store.get(organization_id, workflow_id)
    }

    /// Highest priority first, then by name.
    pub fn list(&self, organization_id: OrganizationId) -> Vec<WorkflowDefinition> {
        let mut workflows = self.store.list(organization_id);
        workflows.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        workflows
    }

    pub fn find_by_name(&self, organization_id: OrganizationId, name: &str) -> Option<WorkflowDefinition> {
        let normalized = normalize_name(name);
        self.store
            .list(organization_id)
            .into_iter()
            .find(|w| normalize_name(&w.name) == normalized)
    }

    fn apply_event(&self, organization_id: OrganizationId, event: WorkflowEvent) {
        if let WorkflowEvent::WorkflowCreated(e) = event {
            self.store.upsert(
                organization_id,
                e.workflow_id,
                WorkflowDefinition {
                    workflow_id: e.workflow_id,
                    name: e.name,
                    description: e.description,
                    priority: e.priority,
                    active: false,
                    steps: Vec::new(),
                },
            );
            return;
        }

        let workflow_id = workflow_of(&event);
        let Some(mut rm) = self.store.get(organization_id, &workflow_id) else {
            tracing::warn!(%workflow_id, "workflow event before creation; skipped");
            return;
        };

        match event {
            WorkflowEvent::WorkflowCreated(_) => {}
            WorkflowEvent::StepAdded(e) => rm.steps.push(e.step),
            // Removing a step drops its conditions and actions with it.
            WorkflowEvent::StepRemoved(e) => rm.steps.retain(|s| s.step_no != e.step_no),
            WorkflowEvent::WorkflowActivated(_) => rm.active = true,
            WorkflowEvent::WorkflowDeactivated(_) => rm.active = false,
        }

        self.store.upsert(organization_id, workflow_id, rm);
    }
}

fn workflow_of(event: &WorkflowEvent) -> WorkflowId {
    match event {
        WorkflowEvent::WorkflowCreated(e) => e.workflow_id,
        WorkflowEvent::StepAdded(e) => e.workflow_id,
        WorkflowEvent::StepRemoved(e) => e.workflow_id,
        WorkflowEvent::WorkflowActivated(e) => e.workflow_id,
        WorkflowEvent::WorkflowDeactivated(e) => e.workflow_id,
    }
}

fn organization_of(event: &WorkflowEvent) -> OrganizationId {
    match event {
        WorkflowEvent::WorkflowCreated(e) => e.organization_id,
        WorkflowEvent::StepAdded(e) => e.organization_id,
        WorkflowEvent::StepRemoved(e) => e.organization_id,
        WorkflowEvent::WorkflowActivated(e) => e.organization_id,
        WorkflowEvent::WorkflowDeactivated(e) => e.organization_id,
    }
}

impl<S> Projection for WorkflowsProjection<S>
where
    S: OrgStore<WorkflowId, WorkflowDefinition>,
{
    fn name(&self) -> &'static str {
        "workflows"
    }

    fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == streams::APPROVAL_WORKFLOW
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if !self.handles(envelope.aggregate_type()) {
            return Ok(());
        }

        self.cursors.apply_once(envelope, || {
            let event: WorkflowEvent = decode(envelope)?;
            ensure_scope(envelope, organization_of(&event), workflow_of(&event).0)?;
            self.apply_event(organization_of(&event), event);
            Ok(())
        })?;

        Ok(())
    }

    fn reset(&self, organization_id: OrganizationId) {
        self.cursors.reset_organization(organization_id);
        self.store.clear_organization(organization_id);
    }
}
