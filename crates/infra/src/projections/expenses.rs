use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use shopledger_core::{Amount, OrganizationId, UserId};
use shopledger_events::EventEnvelope;
use shopledger_expenses::{
    ApprovalPlan, ExpenseEvent, ExpenseId, ExpenseStatus, PlannedStep, RecordedApproval, may_act_on,
};
use shopledger_organization::{CategoryId, LocationId, MemberRole};

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_scope};
use crate::read_model::OrgStore;
use crate::streams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpenseReadModel {
    pub expense_id: ExpenseId,
    pub title: String,
    pub amount: Amount,
    pub category_id: CategoryId,
    pub location_id: LocationId,
    pub spent_on: NaiveDate,
    pub created_by: UserId,
    pub status: ExpenseStatus,
    pub plan: Option<ApprovalPlan>,
    /// Step awaiting a decision while pending.
    pub current_step: Option<PlannedStep>,
    pub approvals: Vec<RecordedApproval>,
    pub rejected_by: Option<UserId>,
    pub rejection_reason: Option<String>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExpenseReadModel {
    /// Whether `user` could approve or reject the current step right now.
    pub fn awaits(&self, user: UserId, roles: &[MemberRole]) -> bool {
        let Some(step) = &self.current_step else {
            return false;
        };
        let already = self
            .approvals
            .iter()
            .any(|a| a.step_no == step.step_no && a.approver == user);
        !already && may_act_on(step, user, roles, self.created_by)
    }
}

#[derive(Debug)]
pub struct ExpensesProjection<S>
where
    S: OrgStore<ExpenseId, ExpenseReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ExpensesProjection<S>
where
    S: OrgStore<ExpenseId, ExpenseReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, organization_id: OrganizationId, expense_id: &ExpenseId) -> Option<ExpenseReadModel> {
        self.store.get(organization_id, expense_id)
    }

    /// Expenses, newest first, optionally filtered by status.
    pub fn list(&self, organization_id: OrganizationId, status: Option<ExpenseStatus>) -> Vec<ExpenseReadModel> {
        let mut expenses: Vec<_> = self
            .store
            .list(organization_id)
            .into_iter()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .collect();
        expenses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        expenses
    }

    /// Pending expenses whose current step `user` can act on.
    pub fn awaiting(&self, organization_id: OrganizationId, user: UserId, roles: &[MemberRole]) -> Vec<ExpenseReadModel> {
        self.list(organization_id, Some(ExpenseStatus::Pending))
            .into_iter()
            .filter(|e| e.awaits(user, roles))
            .collect()
    }

    fn apply_event(&self, organization_id: OrganizationId, event: ExpenseEvent) {
        if let ExpenseEvent::ExpenseCreated(e) = event {
            self.store.upsert(
                organization_id,
                e.expense_id,
                ExpenseReadModel {
                    expense_id: e.expense_id,
                    title: e.title,
                    amount: e.amount,
                    category_id: e.category_id,
                    location_id: e.location_id,
                    spent_on: e.spent_on,
                    created_by: e.created_by,
                    status: ExpenseStatus::Draft,
                    plan: None,
                    current_step: None,
                    approvals: Vec::new(),
                    rejected_by: None,
                    rejection_reason: None,
                    payment_reference: None,
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                },
            );
            return;
        }

        let expense_id = expense_of(&event);
        let Some(mut rm) = self.store.get(organization_id, &expense_id) else {
            tracing::warn!(%expense_id, "expense event before creation; skipped");
            return;
        };

        match event {
            ExpenseEvent::ExpenseCreated(_) => {}
            ExpenseEvent::ExpenseUpdated(e) => {
                rm.title = e.title;
                rm.amount = e.amount;
                rm.category_id = e.category_id;
                rm.location_id = e.location_id;
                rm.spent_on = e.spent_on;
                rm.updated_at = e.occurred_at;
            }
            ExpenseEvent::ExpenseSubmitted(e) => {
                rm.status = ExpenseStatus::Pending;
                rm.current_step = e.first_step().cloned();
                rm.plan = e.plan;
                rm.approvals.clear();
                rm.updated_at = e.occurred_at;
            }
            ExpenseEvent::ApprovalRecorded(e) => {
                rm.approvals.push(e.approval);
                rm.updated_at = e.occurred_at;
            }
            ExpenseEvent::StepAdvanced(e) => {
                rm.current_step = Some(e.next_step);
                rm.updated_at = e.occurred_at;
            }
            ExpenseEvent::ExpenseApproved(e) => {
                rm.status = ExpenseStatus::Approved;
                rm.current_step = None;
                rm.updated_at = e.occurred_at;
            }
            ExpenseEvent::ExpenseRejected(e) => {
                rm.status = ExpenseStatus::Rejected;
                rm.current_step = None;
                rm.rejected_by = Some(e.rejected_by);
                rm.rejection_reason = Some(e.reason);
                rm.updated_at = e.occurred_at;
            }
            ExpenseEvent::ExpenseCancelled(e) => {
                rm.status = ExpenseStatus::Cancelled;
                rm.current_step = None;
                rm.updated_at = e.occurred_at;
            }
            ExpenseEvent::ExpensePaid(e) => {
                rm.status = ExpenseStatus::Paid;
                rm.payment_reference = Some(e.reference);
                rm.updated_at = e.occurred_at;
            }
        }

        self.store.upsert(organization_id, expense_id, rm);
    }
}

pub(crate) fn expense_of(event: &ExpenseEvent) -> ExpenseId {
    match event {
        ExpenseEvent::ExpenseCreated(e) => e.expense_id,
        ExpenseEvent::ExpenseUpdated(e) => e.expense_id,
        ExpenseEvent::ExpenseSubmitted(e) => e.expense_id,
        ExpenseEvent::ApprovalRecorded(e) => e.expense_id,
        ExpenseEvent::StepAdvanced(e) => e.expense_id,
        ExpenseEvent::ExpenseApproved(e) => e.expense_id,
        ExpenseEvent::ExpenseRejected(e) => e.expense_id,
        ExpenseEvent::ExpenseCancelled(e) => e.expense_id,
        ExpenseEvent::ExpensePaid(e) => e.expense_id,
    }
}

pub(crate) fn organization_of(event: &ExpenseEvent) -> OrganizationId {
    match event {
        ExpenseEvent::ExpenseCreated(e) => e.organization_id,
        ExpenseEvent::ExpenseUpdated(e) => e.organization_id,
        ExpenseEvent::ExpenseSubmitted(e) => e.organization_id,
        ExpenseEvent::ApprovalRecorded(e) => e.organization_id,
        ExpenseEvent::StepAdvanced(e) => e.organization_id,
        ExpenseEvent::ExpenseApproved(e) => e.organization_id,
        ExpenseEvent::ExpenseRejected(e) => e.organization_id,
        ExpenseEvent::ExpenseCancelled(e) => e.organization_id,
        ExpenseEvent::ExpensePaid(e) => e.organization_id,
    }
}

impl<S> Projection for ExpensesProjection<S>
where
    S: OrgStore<ExpenseId, ExpenseReadModel>,
{
    fn name(&self) -> &'static str {
        "expenses"
    }

    fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == streams::EXPENSE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if !self.handles(envelope.aggregate_type()) {
            return Ok(());
        }

        self.cursors.apply_once(envelope, || {
            let event: ExpenseEvent = decode(envelope)?;
            ensure_scope(envelope, organization_of(&event), expense_of(&event).0)?;
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
