use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{Aggregate, AggregateRoot, Amount, DomainError, OrganizationId, UserId};
use shopledger_events::Event;
use shopledger_organization::{CategoryId, LocationId, MemberRole};

shopledger_core::aggregate_id_newtype!(
    /// Approval workflow identifier (organization-scoped).
    WorkflowId
);

/// How many of a step's actions must be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// One eligible approval completes the step.
    #[default]
    Any,
    /// Every action needs its own approval, from distinct approvers.
    All,
}

/// Condition an expense must meet for a step to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCondition {
    /// Inclusive bounds; a missing bound is open.
    AmountRange { min: Option<Amount>, max: Option<Amount> },
    Category { category_ids: Vec<CategoryId> },
    Location { location_ids: Vec<LocationId> },
}

/// Who has to sign off a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApproverAction {
    RequireRole { role: MemberRole },
    RequireUser { user_id: UserId },
}

impl ApproverAction {
    pub fn is_satisfied_by(&self, approver: UserId, roles: &[MemberRole]) -> bool {
        match self {
            ApproverAction::RequireRole { role } => roles.contains(role),
            ApproverAction::RequireUser { user_id } => *user_id == approver,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_no: u32,
    pub name: String,
    pub conditions: Vec<StepCondition>,
    pub actions: Vec<ApproverAction>,
    pub mode: ApprovalMode,
}

/// Snapshot of a workflow used for evaluation and by the read side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub priority: i32,
    pub active: bool,
    pub steps: Vec<WorkflowStep>,
}

/// Aggregate root: ApprovalWorkflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalWorkflow {
    id: WorkflowId,
    organization_id: Option<OrganizationId>,
    name: String,
    description: Option<String>,
    priority: i32,
    active: bool,
    steps: Vec<WorkflowStep>,
    last_step_no: u32,
    version: u64,
    created: bool,
}

impl ApprovalWorkflow {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: WorkflowId) -> Self {
        Self {
            id,
            organization_id: None,
            name: String::new(),
            description: None,
            priority: 0,
            active: false,
            steps: Vec::new(),
            last_step_no: 0,
            version: 0,
            created: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn definition(&self) -> WorkflowDefinition {
        WorkflowDefinition {
            workflow_id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            priority: self.priority,
            active: self.active,
            steps: self.steps.clone(),
        }
    }
}

impl AggregateRoot for ApprovalWorkflow {
    type Id = WorkflowId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWorkflow {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    /// Higher wins when several workflows apply.
    pub priority: i32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddStep {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub conditions: Vec<StepCondition>,
    pub actions: Vec<ApproverAction>,
    pub mode: ApprovalMode,
    pub occurred_at: DateTime<Utc>,
}

/// Removes a step together with its conditions and actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveStep {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub step_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateWorkflow {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateWorkflow {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowCommand {
    CreateWorkflow(CreateWorkflow),
    AddStep(AddStep),
    RemoveStep(RemoveStep),
    ActivateWorkflow(ActivateWorkflow),
    DeactivateWorkflow(DeactivateWorkflow),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCreated {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub priority: i32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAdded {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub step: WorkflowStep,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRemoved {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub step_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowActivated {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDeactivated {
    pub organization_id: OrganizationId,
    pub workflow_id: WorkflowId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    WorkflowCreated(WorkflowCreated),
    StepAdded(StepAdded),
    StepRemoved(StepRemoved),
    WorkflowActivated(WorkflowActivated),
    WorkflowDeactivated(WorkflowDeactivated),
}

impl Event for WorkflowEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowCreated(_) => "expenses.workflow.created",
            WorkflowEvent::StepAdded(_) => "expenses.workflow.step_added",
            WorkflowEvent::StepRemoved(_) => "expenses.workflow.step_removed",
            WorkflowEvent::WorkflowActivated(_) => "expenses.workflow.activated",
            WorkflowEvent::WorkflowDeactivated(_) => "expenses.workflow.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WorkflowEvent::WorkflowCreated(e) => e.occurred_at,
            WorkflowEvent::StepAdded(e) => e.occurred_at,
            WorkflowEvent::StepRemoved(e) => e.occurred_at,
            WorkflowEvent::WorkflowActivated(e) => e.occurred_at,
            WorkflowEvent::WorkflowDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ApprovalWorkflow {
    type Command = WorkflowCommand;
    type Event = WorkflowEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WorkflowEvent::WorkflowCreated(e) => {
                self.id = e.workflow_id;
                self.organization_id = Some(e.organization_id);
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.priority = e.priority;
                self.active = false;
                self.steps.clear();
                self.last_step_no = 0;
                self.created = true;
            }
            WorkflowEvent::StepAdded(e) => {
                self.last_step_no = self.last_step_no.max(e.step.step_no);
                self.steps.push(e.step.clone());
            }
            WorkflowEvent::StepRemoved(e) => {
                self.steps.retain(|s| s.step_no != e.step_no);
            }
            WorkflowEvent::WorkflowActivated(_) => {
                self.active = true;
            }
            WorkflowEvent::WorkflowDeactivated(_) => {
                self.active = false;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            WorkflowCommand::CreateWorkflow(cmd) => self.handle_create(cmd),
            WorkflowCommand::AddStep(cmd) => self.handle_add_step(cmd),
            WorkflowCommand::RemoveStep(cmd) => self.handle_remove_step(cmd),
            WorkflowCommand::ActivateWorkflow(cmd) => self.handle_activate(cmd),
            WorkflowCommand::DeactivateWorkflow(cmd) => self.handle_deactivate(cmd),
        }
    }
}

fn validate_condition(condition: &StepCondition) -> Result<(), DomainError> {
    match condition {
        StepCondition::AmountRange { min: Some(min), max: Some(max) } if min > max => {
            Err(DomainError::validation("amount range min must not exceed max"))
        }
        StepCondition::AmountRange { min: None, max: None } => {
            Err(DomainError::validation("amount range needs at least one bound"))
        }
        StepCondition::Category { category_ids } if category_ids.is_empty() => {
            Err(DomainError::validation("category condition needs at least one category"))
        }
        StepCondition::Location { location_ids } if location_ids.is_empty() => {
            Err(DomainError::validation("location condition needs at least one location"))
        }
        _ => Ok(()),
    }
}

impl ApprovalWorkflow {
    fn ensure_workflow(&self, organization_id: OrganizationId, workflow_id: WorkflowId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        if self.id != workflow_id {
            return Err(DomainError::invariant("workflow_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateWorkflow) -> Result<Vec<WorkflowEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("workflow already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        let description = cmd
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        Ok(vec![WorkflowEvent::WorkflowCreated(WorkflowCreated {
            organization_id: cmd.organization_id,
            workflow_id: cmd.workflow_id,
            name: cmd.name.trim().to_string(),
            description,
            priority: cmd.priority,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_step(&self, cmd: &AddStep) -> Result<Vec<WorkflowEvent>, DomainError> {
        self.ensure_workflow(cmd.organization_id, cmd.workflow_id)?;

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("step name cannot be empty"));
        }
        if cmd.actions.is_empty() {
            return Err(DomainError::validation("a step needs at least one approver action"));
        }
        for condition in &cmd.conditions {
            validate_condition(condition)?;
        }

        Ok(vec![WorkflowEvent::StepAdded(StepAdded {
            organization_id: cmd.organization_id,
            workflow_id: cmd.workflow_id,
            step: WorkflowStep {
                step_no: self.last_step_no + 1,
                name: cmd.name.trim().to_string(),
                conditions: cmd.conditions.clone(),
                actions: cmd.actions.clone(),
                mode: cmd.mode,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_step(&self, cmd: &RemoveStep) -> Result<Vec<WorkflowEvent>, DomainError> {
        self.ensure_workflow(cmd.organization_id, cmd.workflow_id)?;

        if !self.steps.iter().any(|s| s.step_no == cmd.step_no) {
            return Err(DomainError::not_found());
        }
        if self.active && self.steps.len() == 1 {
            return Err(DomainError::invariant("an active workflow must keep at least one step"));
        }

        Ok(vec![WorkflowEvent::StepRemoved(StepRemoved {
            organization_id: cmd.organization_id,
            workflow_id: cmd.workflow_id,
            step_no: cmd.step_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateWorkflow) -> Result<Vec<WorkflowEvent>, DomainError> {
        self.ensure_workflow(cmd.organization_id, cmd.workflow_id)?;

        if self.active {
            return Ok(vec![]);
        }
        if self.steps.is_empty() {
            return Err(DomainError::invariant("cannot activate a workflow without steps"));
        }

        Ok(vec![WorkflowEvent::WorkflowActivated(WorkflowActivated {
            organization_id: cmd.organization_id,
            workflow_id: cmd.workflow_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateWorkflow) -> Result<Vec<WorkflowEvent>, DomainError> {
        self.ensure_workflow(cmd.organization_id, cmd.workflow_id)?;

        if !self.active {
            return Ok(vec![]);
        }

        Ok(vec![WorkflowEvent::WorkflowDeactivated(WorkflowDeactivated {
            organization_id: cmd.organization_id,
            workflow_id: cmd.workflow_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn run(wf: &mut ApprovalWorkflow, cmd: WorkflowCommand) -> Result<Vec<WorkflowEvent>, DomainError> {
        let events = wf.handle(&cmd)?;
        for e in &events {
            wf.apply(e);
        }
        Ok(events)
    }

    fn created() -> (ApprovalWorkflow, OrganizationId) {
        let org = OrganizationId::new();
        let workflow_id = WorkflowId::generate();
        let mut wf = ApprovalWorkflow::empty(workflow_id);
        run(
            &mut wf,
            WorkflowCommand::CreateWorkflow(CreateWorkflow {
                organization_id: org,
                workflow_id,
                name: "Large spend".into(),
                description: Some("".into()),
                priority: 10,
                occurred_at: now(),
            }),
        )
        .unwrap();
        (wf, org)
    }

    fn add_step(wf: &mut ApprovalWorkflow, org: OrganizationId, conditions: Vec<StepCondition>) -> Result<Vec<WorkflowEvent>, DomainError> {
        let workflow_id = *wf.id();
        run(
            wf,
            WorkflowCommand::AddStep(AddStep {
                organization_id: org,
                workflow_id,
                name: "Manager sign-off".into(),
                conditions,
                actions: vec![ApproverAction::RequireRole { role: MemberRole::Manager }],
                mode: ApprovalMode::Any,
                occurred_at: now(),
            }),
        )
    }

    fn activate(wf: &mut ApprovalWorkflow, org: OrganizationId) -> Result<Vec<WorkflowEvent>, DomainError> {
        let workflow_id = *wf.id();
        run(
            wf,
            WorkflowCommand::ActivateWorkflow(ActivateWorkflow {
                organization_id: org,
                workflow_id,
                occurred_at: now(),
            }),
        )
    }

    fn remove_step(wf: &mut ApprovalWorkflow, org: OrganizationId, step_no: u32) -> Result<Vec<WorkflowEvent>, DomainError> {
        let workflow_id = *wf.id();
        run(
            wf,
            WorkflowCommand::RemoveStep(RemoveStep {
                organization_id: org,
                workflow_id,
                step_no,
                occurred_at: now(),
            }),
        )
    }

    #[test]
    fn steps_are_numbered_in_ascending_order() {
        let (mut wf, org) = created();
        add_step(&mut wf, org, vec![]).unwrap();
        add_step(&mut wf, org, vec![]).unwrap();
        remove_step(&mut wf, org, 2).unwrap();
        add_step(&mut wf, org, vec![]).unwrap();

        let numbers: Vec<u32> = wf.steps().iter().map(|s| s.step_no).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert_eq!(wf.definition().description, None);
    }

    #[test]
    fn removing_a_step_drops_its_conditions_and_actions() {
        let (mut wf, org) = created();
        add_step(
            &mut wf,
            org,
            vec![StepCondition::AmountRange { min: Some(1_000), max: None }],
        )
        .unwrap();
        add_step(&mut wf, org, vec![]).unwrap();
        remove_step(&mut wf, org, 1).unwrap();

        assert_eq!(wf.steps().len(), 1);
        assert!(wf.steps()[0].conditions.is_empty());
    }

    #[test]
    fn cannot_activate_without_steps() {
        let (mut wf, org) = created();
        assert!(matches!(activate(&mut wf, org), Err(DomainError::InvariantViolation(_))));
        add_step(&mut wf, org, vec![]).unwrap();
        activate(&mut wf, org).unwrap();
        assert!(wf.is_active());
    }

    #[test]
    fn active_workflow_keeps_its_last_step() {
        let (mut wf, org) = created();
        add_step(&mut wf, org, vec![]).unwrap();
        activate(&mut wf, org).unwrap();
        assert!(matches!(
            remove_step(&mut wf, org, 1),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn inverted_amount_range_is_rejected() {
        let (mut wf, org) = created();
        let err = add_step(
            &mut wf,
            org,
            vec![StepCondition::AmountRange { min: Some(500), max: Some(100) }],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn step_without_actions_is_rejected() {
        let (wf, org) = created();
        let err = wf
            .handle(&WorkflowCommand::AddStep(AddStep {
                organization_id: org,
                workflow_id: *wf.id(),
                name: "Nobody".into(),
                conditions: vec![],
                actions: vec![],
                mode: ApprovalMode::All,
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn conditions_and_actions_serialize_as_tagged_json() {
        let condition = StepCondition::AmountRange { min: Some(100), max: None };
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "amount_range");
        assert_eq!(json["min"], 100);

        let action: ApproverAction =
            serde_json::from_str(r#"{"type":"require_role","role":"accountant"}"#).unwrap();
        assert_eq!(action, ApproverAction::RequireRole { role: MemberRole::Accountant });
    }
}
