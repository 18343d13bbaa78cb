//! Expense domain module (event-sourced).
//!
//! - [`workflow`]: approval workflows, an ordered list of conditional steps.
//! - [`approval`]: pure evaluation, picking the workflow and steps that gate
//!   an expense and deciding who may approve the current step.
//! - [`expense`]: the expense lifecycle from draft to paid.

pub mod approval;
pub mod expense;
pub mod workflow;

pub use approval::{
    ApprovalPlan, ExpenseFacts, PlannedStep, RecordedApproval, eligible_action, is_step_complete,
    may_act_on, select_plan,
};
pub use expense::{
    ApprovalRecorded, ApproveExpense, CancelExpense, CreateExpense, Expense, ExpenseApproved,
    ExpenseCancelled, ExpenseCommand, ExpenseCreated, ExpenseEvent, ExpenseId, ExpensePaid,
    ExpenseRejected, ExpenseStatus, ExpenseSubmitted, ExpenseUpdated, MarkExpensePaid,
    RejectExpense, StepAdvanced, SubmitExpense, UpdateExpense,
};
pub use workflow::{
    ActivateWorkflow, AddStep, ApprovalMode, ApprovalWorkflow, ApproverAction, CreateWorkflow,
    DeactivateWorkflow, RemoveStep, StepAdded, StepCondition, StepRemoved, WorkflowActivated,
    WorkflowCommand, WorkflowCreated, WorkflowDeactivated, WorkflowDefinition, WorkflowEvent,
    WorkflowId, WorkflowStep,
};
