use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{Aggregate, AggregateRoot, Amount, DomainError, OrganizationId, UserId};
use shopledger_events::Event;
use shopledger_organization::{CategoryId, LocationId, MemberRole};

use crate::approval::{
    ApprovalPlan, ExpenseFacts, PlannedStep, RecordedApproval, eligible_action, is_step_complete,
    may_act_on,
};

shopledger_core::aggregate_id_newtype!(
    /// Expense identifier (organization-scoped via `organization_id` in events/commands).
    ExpenseId
);

/// Expense status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Paid,
}

/// Aggregate root: Expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expense {
    id: ExpenseId,
    organization_id: Option<OrganizationId>,
    title: String,
    amount: Amount,
    category_id: Option<CategoryId>,
    location_id: Option<LocationId>,
    spent_on: Option<NaiveDate>,
    created_by: Option<UserId>,
    status: ExpenseStatus,
    plan: Option<ApprovalPlan>,
    current_step: usize,
    approvals: Vec<RecordedApproval>,
    version: u64,
    created: bool,
}

impl Expense {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ExpenseId) -> Self {
        Self {
            id,
            organization_id: None,
            title: String::new(),
            amount: 0,
            category_id: None,
            location_id: None,
            spent_on: None,
            created_by: None,
            status: ExpenseStatus::Draft,
            plan: None,
            current_step: 0,
            approvals: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn status(&self) -> ExpenseStatus {
        self.status
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn approvals(&self) -> &[RecordedApproval] {
        &self.approvals
    }

    /// Facts that approval conditions are evaluated against.
    pub fn facts(&self) -> Option<ExpenseFacts> {
        Some(ExpenseFacts {
            amount: self.amount,
            category_id: self.category_id?,
            location_id: self.location_id?,
        })
    }

    /// The step awaiting approval, while pending.
    pub fn current_step(&self) -> Option<&PlannedStep> {
        if self.status != ExpenseStatus::Pending {
            return None;
        }
        self.plan.as_ref()?.steps.get(self.current_step)
    }
}

impl AggregateRoot for Expense {
    type Id = ExpenseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateExpense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateExpense {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub title: String,
    pub amount: Amount,
    pub category_id: CategoryId,
    pub location_id: LocationId,
    pub spent_on: NaiveDate,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateExpense (draft only). `None` keeps the current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateExpense {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub title: Option<String>,
    pub amount: Option<Amount>,
    pub category_id: Option<CategoryId>,
    pub location_id: Option<LocationId>,
    pub spent_on: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitExpense. `plan = None` approves on submission. Only the
/// creator may submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitExpense {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub by: UserId,
    pub plan: Option<ApprovalPlan>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveExpense {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub approver: UserId,
    pub roles: Vec<MemberRole>,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectExpense {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub approver: UserId,
    pub roles: Vec<MemberRole>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelExpense {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkExpensePaid {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseCommand {
    CreateExpense(CreateExpense),
    UpdateExpense(UpdateExpense),
    SubmitExpense(SubmitExpense),
    ApproveExpense(ApproveExpense),
    RejectExpense(RejectExpense),
    CancelExpense(CancelExpense),
    MarkExpensePaid(MarkExpensePaid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseCreated {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub title: String,
    pub amount: Amount,
    pub category_id: CategoryId,
    pub location_id: LocationId,
    pub spent_on: NaiveDate,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpenseUpdated. Carries the full set of editable values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseUpdated {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub title: String,
    pub amount: Amount,
    pub category_id: CategoryId,
    pub location_id: LocationId,
    pub spent_on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseSubmitted {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub title: String,
    pub amount: Amount,
    pub created_by: UserId,
    pub plan: Option<ApprovalPlan>,
    pub occurred_at: DateTime<Utc>,
}

impl ExpenseSubmitted {
    /// First step to be approved, if any.
    pub fn first_step(&self) -> Option<&PlannedStep> {
        self.plan.as_ref()?.steps.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecorded {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub approval: RecordedApproval,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StepAdvanced. The previous step is complete and `next_step` awaits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAdvanced {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub title: String,
    pub completed_step_no: u32,
    pub next_step: PlannedStep,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseApproved {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub title: String,
    pub created_by: UserId,
    /// `true` when no workflow applied at submission.
    pub automatic: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRejected {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub title: String,
    pub created_by: UserId,
    pub step_no: u32,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseCancelled {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpensePaid {
    pub organization_id: OrganizationId,
    pub expense_id: ExpenseId,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseEvent {
    ExpenseCreated(ExpenseCreated),
    ExpenseUpdated(ExpenseUpdated),
    ExpenseSubmitted(ExpenseSubmitted),
    ApprovalRecorded(ApprovalRecorded),
    StepAdvanced(StepAdvanced),
    ExpenseApproved(ExpenseApproved),
    ExpenseRejected(ExpenseRejected),
    ExpenseCancelled(ExpenseCancelled),
    ExpensePaid(ExpensePaid),
}

impl Event for ExpenseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ExpenseEvent::ExpenseCreated(_) => "expenses.expense.created",
            ExpenseEvent::ExpenseUpdated(_) => "expenses.expense.updated",
            ExpenseEvent::ExpenseSubmitted(_) => "expenses.expense.submitted",
            ExpenseEvent::ApprovalRecorded(_) => "expenses.expense.approval_recorded",
            ExpenseEvent::StepAdvanced(_) => "expenses.expense.step_advanced",
            ExpenseEvent::ExpenseApproved(_) => "expenses.expense.approved",
            ExpenseEvent::ExpenseRejected(_) => "expenses.expense.rejected",
            ExpenseEvent::ExpenseCancelled(_) => "expenses.expense.cancelled",
            ExpenseEvent::ExpensePaid(_) => "expenses.expense.paid",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ExpenseEvent::ExpenseCreated(e) => e.occurred_at,
            ExpenseEvent::ExpenseUpdated(e) => e.occurred_at,
            ExpenseEvent::ExpenseSubmitted(e) => e.occurred_at,
            ExpenseEvent::ApprovalRecorded(e) => e.occurred_at,
            ExpenseEvent::StepAdvanced(e) => e.occurred_at,
            ExpenseEvent::ExpenseApproved(e) => e.occurred_at,
            ExpenseEvent::ExpenseRejected(e) => e.occurred_at,
            ExpenseEvent::ExpenseCancelled(e) => e.occurred_at,
            ExpenseEvent::ExpensePaid(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Expense {
    type Command = ExpenseCommand;
    type Event = ExpenseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ExpenseEvent::ExpenseCreated(e) => {
                self.id = e.expense_id;
                self.organization_id = Some(e.organization_id);
                self.title = e.title.clone();
                self.amount = e.amount;
                self.category_id = Some(e.category_id);
                self.location_id = Some(e.location_id);
                self.spent_on = Some(e.spent_on);
                self.created_by = Some(e.created_by);
                self.status = ExpenseStatus::Draft;
                self.plan = None;
                self.current_step = 0;
                self.approvals.clear();
                self.created = true;
            }
            ExpenseEvent::ExpenseUpdated(e) => {
                self.title = e.title.clone();
                self.amount = e.amount;
                self.category_id = Some(e.category_id);
                self.location_id = Some(e.location_id);
                self.spent_on = Some(e.spent_on);
            }
            ExpenseEvent::ExpenseSubmitted(e) => {
                self.plan = e.plan.clone();
                self.current_step = 0;
                self.approvals.clear();
                self.status = ExpenseStatus::Pending;
            }
            ExpenseEvent::ApprovalRecorded(e) => {
                self.approvals.push(e.approval.clone());
            }
            ExpenseEvent::StepAdvanced(_) => {
                self.current_step += 1;
            }
            ExpenseEvent::ExpenseApproved(_) => {
                self.status = ExpenseStatus::Approved;
            }
            ExpenseEvent::ExpenseRejected(_) => {
                self.status = ExpenseStatus::Rejected;
            }
            ExpenseEvent::ExpenseCancelled(_) => {
                self.status = ExpenseStatus::Cancelled;
            }
            ExpenseEvent::ExpensePaid(_) => {
                self.status = ExpenseStatus::Paid;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ExpenseCommand::CreateExpense(cmd) => self.handle_create(cmd),
            ExpenseCommand::UpdateExpense(cmd) => self.handle_update(cmd),
            ExpenseCommand::SubmitExpense(cmd) => self.handle_submit(cmd),
            ExpenseCommand::ApproveExpense(cmd) => self.handle_approve(cmd),
            ExpenseCommand::RejectExpense(cmd) => self.handle_reject(cmd),
            ExpenseCommand::CancelExpense(cmd) => self.handle_cancel(cmd),
            ExpenseCommand::MarkExpensePaid(cmd) => self.handle_mark_paid(cmd),
        }
    }
}

impl Expense {
    fn ensure_expense(&self, organization_id: OrganizationId, expense_id: ExpenseId) -> Result<UserId, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        if self.id != expense_id {
            return Err(DomainError::invariant("expense_id mismatch"));
        }
        self.created_by
            .ok_or_else(|| DomainError::invariant("expense has no creator"))
    }

    fn ensure_status(&self, expected: ExpenseStatus, action: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invariant(format!(
                "cannot {action} an expense that is {:?}",
                self.status
            )));
        }
        Ok(())
    }

    fn pending_step(&self) -> Result<&PlannedStep, DomainError> {
        self.ensure_status(ExpenseStatus::Pending, "decide on")?;
        self.current_step()
            .ok_or_else(|| DomainError::invariant("pending expense has no step awaiting approval"))
    }

    fn handle_create(&self, cmd: &CreateExpense) -> Result<Vec<ExpenseEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("expense already exists"));
        }
        if cmd.title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        if cmd.amount == 0 {
            return Err(DomainError::validation("amount must be positive"));
        }

        Ok(vec![ExpenseEvent::ExpenseCreated(ExpenseCreated {
            organization_id: cmd.organization_id,
            expense_id: cmd.expense_id,
            title: cmd.title.trim().to_string(),
            amount: cmd.amount,
            category_id: cmd.category_id,
            location_id: cmd.location_id,
            spent_on: cmd.spent_on,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateExpense) -> Result<Vec<ExpenseEvent>, DomainError> {
        self.ensure_expense(cmd.organization_id, cmd.expense_id)?;
        self.ensure_status(ExpenseStatus::Draft, "update")?;

        let title = match &cmd.title {
            Some(t) if t.trim().is_empty() => {
                return Err(DomainError::validation("title cannot be empty"));
            }
            Some(t) => t.trim().to_string(),
            None => self.title.clone(),
        };
        let amount = cmd.amount.unwrap_or(self.amount);
        if amount == 0 {
            return Err(DomainError::validation("amount must be positive"));
        }
        let (category_id, location_id, spent_on) = match (
            cmd.category_id.or(self.category_id),
            cmd.location_id.or(self.location_id),
            cmd.spent_on.or(self.spent_on),
        ) {
            (Some(c), Some(l), Some(d)) => (c, l, d),
            _ => return Err(DomainError::invariant("expense is missing category, location or date")),
        };

        Ok(vec![ExpenseEvent::ExpenseUpdated(ExpenseUpdated {
            organization_id: cmd.organization_id,
            expense_id: cmd.expense_id,
            title,
            amount,
            category_id,
            location_id,
            spent_on,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitExpense) -> Result<Vec<ExpenseEvent>, DomainError> {
        let created_by = self.ensure_expense(cmd.organization_id, cmd.expense_id)?;
        if cmd.by != created_by {
            return Err(DomainError::Unauthorized);
        }
        self.ensure_status(ExpenseStatus::Draft, "submit")?;

        let plan = cmd.plan.clone().filter(|p| !p.steps.is_empty());
        let automatic = plan.is_none();

        let mut events = vec![ExpenseEvent::ExpenseSubmitted(ExpenseSubmitted {
            organization_id: cmd.organization_id,
            expense_id: cmd.expense_id,
            title: self.title.clone(),
            amount: self.amount,
            created_by,
            plan,
            occurred_at: cmd.occurred_at,
        })];
        if automatic {
            events.push(ExpenseEvent::ExpenseApproved(ExpenseApproved {
                organization_id: cmd.organization_id,
                expense_id: cmd.expense_id,
                title: self.title.clone(),
                created_by,
                automatic: true,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_approve(&self, cmd: &ApproveExpense) -> Result<Vec<ExpenseEvent>, DomainError> {
        let created_by = self.ensure_expense(cmd.organization_id, cmd.expense_id)?;
        let step = self.pending_step()?;

        let action_index = eligible_action(step, &self.approvals, cmd.approver, &cmd.roles, created_by)?;
        let approval = RecordedApproval {
            step_no: step.step_no,
            approver: cmd.approver,
            action_index,
            comment: cmd
                .comment
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        };

        let mut after = self.approvals.clone();
        after.push(approval.clone());

        let mut events = vec![ExpenseEvent::ApprovalRecorded(ApprovalRecorded {
            organization_id: cmd.organization_id,
            expense_id: cmd.expense_id,
            approval,
            occurred_at: cmd.occurred_at,
        })];

        if is_step_complete(step, &after) {
            let next = self
                .plan
                .as_ref()
                .and_then(|p| p.steps.get(self.current_step + 1));
            match next {
                Some(next_step) => events.push(ExpenseEvent::StepAdvanced(StepAdvanced {
                    organization_id: cmd.organization_id,
                    expense_id: cmd.expense_id,
                    title: self.title.clone(),
                    completed_step_no: step.step_no,
                    next_step: next_step.clone(),
                    occurred_at: cmd.occurred_at,
                })),
                None => events.push(ExpenseEvent::ExpenseApproved(ExpenseApproved {
                    organization_id: cmd.organization_id,
                    expense_id: cmd.expense_id,
                    title: self.title.clone(),
                    created_by,
                    automatic: false,
                    occurred_at: cmd.occurred_at,
                })),
            }
        }

        Ok(events)
    }

    fn handle_reject(&self, cmd: &RejectExpense) -> Result<Vec<ExpenseEvent>, DomainError> {
        let created_by = self.ensure_expense(cmd.organization_id, cmd.expense_id)?;
        let step = self.pending_step()?;

        if !may_act_on(step, cmd.approver, &cmd.roles, created_by) {
            return Err(DomainError::Unauthorized);
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason cannot be empty"));
        }

        Ok(vec![ExpenseEvent::ExpenseRejected(ExpenseRejected {
            organization_id: cmd.organization_id,
            expense_id: cmd.expense_id,
            title: self.title.clone(),
            created_by,
            step_no: step.step_no,
            rejected_by: cmd.approver,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelExpense) -> Result<Vec<ExpenseEvent>, DomainError> {
        let created_by = self.ensure_expense(cmd.organization_id, cmd.expense_id)?;

        if cmd.by != created_by {
            return Err(DomainError::Unauthorized);
        }
        if !matches!(self.status, ExpenseStatus::Draft | ExpenseStatus::Pending) {
            return Err(DomainError::invariant("only draft or pending expenses can be cancelled"));
        }

        Ok(vec![ExpenseEvent::ExpenseCancelled(ExpenseCancelled {
            organization_id: cmd.organization_id,
            expense_id: cmd.expense_id,
            by: cmd.by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_paid(&self, cmd: &MarkExpensePaid) -> Result<Vec<ExpenseEvent>, DomainError> {
        self.ensure_expense(cmd.organization_id, cmd.expense_id)?;
        self.ensure_status(ExpenseStatus::Approved, "pay")?;

        if cmd.reference.trim().is_empty() {
            return Err(DomainError::validation("payment reference cannot be empty"));
        }

        Ok(vec![ExpenseEvent::ExpensePaid(ExpensePaid {
            organization_id: cmd.organization_id,
            expense_id: cmd.expense_id,
            reference: cmd.reference.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ApprovalMode, ApproverAction, WorkflowId};

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    struct Fixture {
        org: OrganizationId,
        creator: UserId,
        expense: Expense,
    }

    impl Fixture {
        fn drafted(amount: Amount) -> Self {
            let org = OrganizationId::new();
            let creator = UserId::new();
            let expense_id = ExpenseId::generate();
            let mut f = Self {
                org,
                creator,
                expense: Expense::empty(expense_id),
            };
            f.run(ExpenseCommand::CreateExpense(CreateExpense {
                organization_id: org,
                expense_id,
                title: "Shop rent".into(),
                amount,
                category_id: CategoryId::generate(),
                location_id: LocationId::generate(),
                spent_on: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
                created_by: creator,
                occurred_at: now(),
            }))
            .unwrap();
            f
        }

        fn id(&self) -> ExpenseId {
            *self.expense.id()
        }

        fn run(&mut self, cmd: ExpenseCommand) -> Result<Vec<ExpenseEvent>, DomainError> {
            let events = self.expense.handle(&cmd)?;
            for e in &events {
                self.expense.apply(e);
            }
            Ok(events)
        }

        fn submit(&mut self, plan: Option<ApprovalPlan>) -> Result<Vec<ExpenseEvent>, DomainError> {
            self.submit_as(self.creator, plan)
        }

        fn submit_as(&mut self, by: UserId, plan: Option<ApprovalPlan>) -> Result<Vec<ExpenseEvent>, DomainError> {
            let cmd = ExpenseCommand::SubmitExpense(SubmitExpense {
                organization_id: self.org,
                expense_id: self.id(),
                by,
                plan,
                occurred_at: now(),
            });
            self.run(cmd)
        }

        fn approve(&mut self, approver: UserId, roles: &[MemberRole]) -> Result<Vec<ExpenseEvent>, DomainError> {
            let cmd = ExpenseCommand::ApproveExpense(ApproveExpense {
                organization_id: self.org,
                expense_id: self.id(),
                approver,
                roles: roles.to_vec(),
                comment: None,
                occurred_at: now(),
            });
            self.run(cmd)
        }

        fn reject(&mut self, approver: UserId, roles: &[MemberRole]) -> Result<Vec<ExpenseEvent>, DomainError> {
            let cmd = ExpenseCommand::RejectExpense(RejectExpense {
                organization_id: self.org,
                expense_id: self.id(),
                approver,
                roles: roles.to_vec(),
                reason: "not budgeted".into(),
                occurred_at: now(),
            });
            self.run(cmd)
        }
    }

    fn two_step_plan(cfo: UserId) -> ApprovalPlan {
        ApprovalPlan {
            workflow_id: WorkflowId::generate(),
            workflow_name: "Large spend".into(),
            steps: vec![
                PlannedStep {
                    step_no: 1,
                    name: "Manager".into(),
                    actions: vec![ApproverAction::RequireRole { role: MemberRole::Manager }],
                    mode: ApprovalMode::Any,
                },
                PlannedStep {
                    step_no: 2,
                    name: "Finance".into(),
                    actions: vec![
                        ApproverAction::RequireRole { role: MemberRole::Accountant },
                        ApproverAction::RequireUser { user_id: cfo },
                    ],
                    mode: ApprovalMode::All,
                },
            ],
        }
    }

    #[test]
    fn submission_without_plan_is_approved_immediately() {
        let mut f = Fixture::drafted(1_500);
        let events = f.submit(None).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], ExpenseEvent::ExpenseApproved(e) if e.automatic));
        assert_eq!(f.expense.status(), ExpenseStatus::Approved);
    }

    #[test]
    fn only_the_creator_may_submit() {
        let mut f = Fixture::drafted(1_500);
        assert_eq!(f.submit_as(UserId::new(), None), Err(DomainError::Unauthorized));
        assert_eq!(f.expense.status(), ExpenseStatus::Draft);
        f.submit(None).unwrap();
        assert_eq!(f.expense.status(), ExpenseStatus::Approved);
    }

    #[test]
    fn multi_step_plan_walks_to_approval() {
        let cfo = UserId::new();
        let mut f = Fixture::drafted(90_000);
        f.submit(Some(two_step_plan(cfo))).unwrap();
        assert_eq!(f.expense.status(), ExpenseStatus::Pending);
        assert_eq!(f.expense.current_step().unwrap().step_no, 1);

        let events = f.approve(UserId::new(), &[MemberRole::Manager]).unwrap();
        assert!(matches!(&events[1], ExpenseEvent::StepAdvanced(e) if e.next_step.step_no == 2));
        assert_eq!(f.expense.current_step().unwrap().step_no, 2);

        let events = f.approve(UserId::new(), &[MemberRole::Accountant]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(f.expense.status(), ExpenseStatus::Pending);

        let events = f.approve(cfo, &[]).unwrap();
        assert!(matches!(&events[1], ExpenseEvent::ExpenseApproved(e) if !e.automatic));
        assert_eq!(f.expense.status(), ExpenseStatus::Approved);
        assert_eq!(f.expense.approvals().len(), 3);
    }

    #[test]
    fn creator_cannot_approve_own_expense() {
        let mut f = Fixture::drafted(90_000);
        f.submit(Some(two_step_plan(UserId::new()))).unwrap();
        let creator = f.creator;
        assert_eq!(
            f.approve(creator, &[MemberRole::Manager]).unwrap_err(),
            DomainError::Unauthorized
        );
    }

    #[test]
    fn rejection_requires_an_approver_of_the_current_step() {
        let mut f = Fixture::drafted(90_000);
        f.submit(Some(two_step_plan(UserId::new()))).unwrap();

        assert_eq!(
            f.reject(UserId::new(), &[MemberRole::Cashier]).unwrap_err(),
            DomainError::Unauthorized
        );
        let events = f.reject(UserId::new(), &[MemberRole::Manager]).unwrap();
        assert!(matches!(&events[0], ExpenseEvent::ExpenseRejected(e) if e.step_no == 1));
        assert_eq!(f.expense.status(), ExpenseStatus::Rejected);
    }

    #[test]
    fn only_draft_expenses_can_be_updated() {
        let mut f = Fixture::drafted(100);
        let org = f.org;
        let id = f.id();
        let update = |amount| {
            ExpenseCommand::UpdateExpense(UpdateExpense {
                organization_id: org,
                expense_id: id,
                title: None,
                amount: Some(amount),
                category_id: None,
                location_id: None,
                spent_on: None,
                occurred_at: now(),
            })
        };
        f.run(update(250)).unwrap();
        assert_eq!(f.expense.amount(), 250);

        f.submit(None).unwrap();
        assert!(matches!(f.run(update(300)), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn only_creator_can_cancel_and_only_before_decision() {
        let mut f = Fixture::drafted(100);
        let org = f.org;
        let id = f.id();
        let cancel = |by| {
            ExpenseCommand::CancelExpense(CancelExpense {
                organization_id: org,
                expense_id: id,
                by,
                occurred_at: now(),
            })
        };
        assert_eq!(f.run(cancel(UserId::new())).unwrap_err(), DomainError::Unauthorized);

        let creator = f.creator;
        f.run(cancel(creator)).unwrap();
        assert_eq!(f.expense.status(), ExpenseStatus::Cancelled);
        assert!(matches!(f.run(cancel(creator)), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn payment_requires_approval() {
        let mut f = Fixture::drafted(100);
        let org = f.org;
        let id = f.id();
        let pay = ExpenseCommand::MarkExpensePaid(MarkExpensePaid {
            organization_id: org,
            expense_id: id,
            reference: "TRX-1".into(),
            occurred_at: now(),
        });
        assert!(matches!(f.run(pay.clone()), Err(DomainError::InvariantViolation(_))));

        f.submit(None).unwrap();
        f.run(pay).unwrap();
        assert_eq!(f.expense.status(), ExpenseStatus::Paid);
    }

    #[test]
    fn empty_plan_counts_as_no_plan() {
        let mut f = Fixture::drafted(100);
        let plan = ApprovalPlan {
            workflow_id: WorkflowId::generate(),
            workflow_name: "empty".into(),
            steps: vec![],
        };
        f.submit(Some(plan)).unwrap();
        assert_eq!(f.expense.status(), ExpenseStatus::Approved);
    }
}
