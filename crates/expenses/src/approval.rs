//! Approval evaluation.
//!
//! Pure functions over workflow definitions: which workflow gates an expense,
//! which of its steps apply, and whether a given approver may sign off the
//! current step.

use core::cmp::Reverse;

use serde::{Deserialize, Serialize};

use shopledger_core::{Amount, DomainError, UserId};
use shopledger_organization::{CategoryId, LocationId, MemberRole};

use crate::workflow::{
    ApprovalMode, ApproverAction, StepCondition, WorkflowDefinition, WorkflowId, WorkflowStep,
};

/// The attributes of an expense that step conditions look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseFacts {
    pub amount: Amount,
    pub category_id: CategoryId,
    pub location_id: LocationId,
}

impl StepCondition {
    pub fn matches(&self, facts: &ExpenseFacts) -> bool {
        match self {
            StepCondition::AmountRange { min, max } => {
                min.is_none_or(|min| facts.amount >= min) && max.is_none_or(|max| facts.amount <= max)
            }
            StepCondition::Category { category_ids } => category_ids.contains(&facts.category_id),
            StepCondition::Location { location_ids } => location_ids.contains(&facts.location_id),
        }
    }
}

impl WorkflowStep {
    /// A step applies when every condition matches; no conditions always applies.
    pub fn applies_to(&self, facts: &ExpenseFacts) -> bool {
        self.conditions.iter().all(|c| c.matches(facts))
    }
}

/// A step of the plan an expense has to pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step_no: u32,
    pub name: String,
    pub actions: Vec<ApproverAction>,
    pub mode: ApprovalMode,
}

/// Ordered approval steps chosen for one expense at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPlan {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub steps: Vec<PlannedStep>,
}

/// An approval given on a step, with the action it satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedApproval {
    pub step_no: u32,
    pub approver: UserId,
    pub action_index: usize,
    pub comment: Option<String>,
}

/// Pick the workflow that gates an expense and build its plan.
///
/// Only active workflows with at least one applicable step compete. The
/// highest priority wins; ties go to the lowest workflow id. `None` means no
/// workflow applies and the expense is approved on submission.
pub fn select_plan(workflows: &[WorkflowDefinition], facts: &ExpenseFacts) -> Option<ApprovalPlan> {
    workflows
        .iter()
        .filter(|w| w.active)
        .filter_map(|w| {
            let steps: Vec<PlannedStep> = w
                .steps
                .iter()
                .filter(|s| s.applies_to(facts))
                .map(|s| PlannedStep {
                    step_no: s.step_no,
                    name: s.name.clone(),
                    actions: s.actions.clone(),
                    mode: s.mode,
                })
                .collect();
            (!steps.is_empty()).then_some((w, steps))
        })
        .max_by_key(|(w, _)| (w.priority, Reverse(w.workflow_id)))
        .map(|(w, mut steps)| {
            steps.sort_by_key(|s| s.step_no);
            ApprovalPlan {
                workflow_id: w.workflow_id,
                workflow_name: w.name.clone(),
                steps,
            }
        })
}

/// Whether `approver` holds any of the step's actions, ignoring what was
/// already approved. Used for rejection.
pub fn may_act_on(step: &PlannedStep, approver: UserId, roles: &[MemberRole], submitter: UserId) -> bool {
    approver != submitter && step.actions.iter().any(|a| a.is_satisfied_by(approver, roles))
}

/// Index of the action an approval by `approver` would satisfy.
///
/// The approver must not be the submitter, must not have approved this step
/// already, and must match an action that is still unsatisfied.
pub fn eligible_action(
    step: &PlannedStep,
    approvals: &[RecordedApproval],
    approver: UserId,
    roles: &[MemberRole],
    submitter: UserId,
) -> Result<usize, DomainError> {
    if approver == submitter {
        return Err(DomainError::Unauthorized);
    }

    let on_step: Vec<&RecordedApproval> = approvals.iter().filter(|a| a.step_no == step.step_no).collect();
    if on_step.iter().any(|a| a.approver == approver) {
        return Err(DomainError::conflict("approver already approved this step"));
    }

    step.actions
        .iter()
        .enumerate()
        .filter(|(i, _)| !on_step.iter().any(|a| a.action_index == *i))
        .find(|(_, action)| action.is_satisfied_by(approver, roles))
        .map(|(i, _)| i)
        .ok_or(DomainError::Unauthorized)
}

/// `Any`: one approval completes the step. `All`: every action is satisfied.
pub fn is_step_complete(step: &PlannedStep, approvals: &[RecordedApproval]) -> bool {
    let mut on_step = approvals.iter().filter(|a| a.step_no == step.step_no);
    match step.mode {
        ApprovalMode::Any => on_step.next().is_some(),
        ApprovalMode::All => {
            let satisfied: Vec<usize> = on_step.map(|a| a.action_index).collect();
            (0..step.actions.len()).all(|i| satisfied.contains(&i))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shopledger_core::AggregateId;

    /// Workflow ids with a known order, independent of v7 timestamps.
    fn ordered_workflow_id(n: u8) -> WorkflowId {
        let s = format!("00000000-0000-7000-8000-0000000000{n:02x}");
        WorkflowId::new(s.parse::<AggregateId>().unwrap())
    }

    fn facts(amount: Amount) -> ExpenseFacts {
        ExpenseFacts {
            amount,
            category_id: CategoryId::generate(),
            location_id: LocationId::generate(),
        }
    }

    fn step(step_no: u32, conditions: Vec<StepCondition>, actions: Vec<ApproverAction>, mode: ApprovalMode) -> WorkflowStep {
        WorkflowStep {
            step_no,
            name: format!("step {step_no}"),
            conditions,
            actions,
            mode,
        }
    }

    fn workflow(id: WorkflowId, priority: i32, steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            workflow_id: id,
            name: format!("wf {priority}"),
            description: None,
            priority,
            active: true,
            steps,
        }
    }

    fn manager() -> ApproverAction {
        ApproverAction::RequireRole { role: MemberRole::Manager }
    }

    fn planned(actions: Vec<ApproverAction>, mode: ApprovalMode) -> PlannedStep {
        PlannedStep {
            step_no: 1,
            name: "sign-off".into(),
            actions,
            mode,
        }
    }

    #[test]
    fn amount_range_bounds_are_inclusive() {
        let range = StepCondition::AmountRange { min: Some(100), max: Some(500) };
        assert!(range.matches(&facts(100)));
        assert!(range.matches(&facts(500)));
        assert!(!range.matches(&facts(99)));
        assert!(!range.matches(&facts(501)));

        let open = StepCondition::AmountRange { min: Some(1_000), max: None };
        assert!(open.matches(&facts(u64::MAX)));
    }

    #[test]
    fn category_and_location_conditions_match_membership() {
        let f = facts(10);
        assert!(StepCondition::Category { category_ids: vec![f.category_id] }.matches(&f));
        assert!(!StepCondition::Location { location_ids: vec![LocationId::generate()] }.matches(&f));
    }

    #[test]
    fn plan_keeps_only_applicable_steps_in_order() {
        let wf = workflow(
            ordered_workflow_id(1),
            0,
            vec![
                step(3, vec![], vec![manager()], ApprovalMode::Any),
                step(1, vec![StepCondition::AmountRange { min: Some(1_000), max: None }], vec![manager()], ApprovalMode::Any),
                step(2, vec![StepCondition::AmountRange { min: None, max: Some(50) }], vec![manager()], ApprovalMode::Any),
            ],
        );
        let plan = select_plan(&[wf], &facts(5_000)).unwrap();
        let numbers: Vec<u32> = plan.steps.iter().map(|s| s.step_no).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn highest_priority_wins_and_ties_go_to_lowest_id() {
        let any_step = || vec![step(1, vec![], vec![manager()], ApprovalMode::Any)];
        let low = workflow(ordered_workflow_id(1), 1, any_step());
        let high_b = workflow(ordered_workflow_id(3), 5, any_step());
        let high_a = workflow(ordered_workflow_id(2), 5, any_step());

        let plan = select_plan(&[low, high_b, high_a], &facts(10)).unwrap();
        assert_eq!(plan.workflow_id, ordered_workflow_id(2));
    }

    #[test]
    fn inactive_or_non_matching_workflows_are_ignored() {
        let mut inactive = workflow(
            ordered_workflow_id(1),
            9,
            vec![step(1, vec![], vec![manager()], ApprovalMode::Any)],
        );
        inactive.active = false;
        let non_matching = workflow(
            ordered_workflow_id(2),
            9,
            vec![step(1, vec![StepCondition::AmountRange { min: Some(1_000), max: None }], vec![manager()], ApprovalMode::Any)],
        );
        assert_eq!(select_plan(&[inactive, non_matching], &facts(10)), None);
    }

    #[test]
    fn submitter_cannot_approve_own_expense() {
        let submitter = UserId::new();
        let s = planned(vec![manager()], ApprovalMode::Any);
        assert_eq!(
            eligible_action(&s, &[], submitter, &[MemberRole::Manager], submitter),
            Err(DomainError::Unauthorized)
        );
        assert!(!may_act_on(&s, submitter, &[MemberRole::Manager], submitter));
    }

    #[test]
    fn approver_without_matching_action_is_unauthorized() {
        let s = planned(vec![manager()], ApprovalMode::Any);
        assert_eq!(
            eligible_action(&s, &[], UserId::new(), &[MemberRole::Cashier], UserId::new()),
            Err(DomainError::Unauthorized)
        );
    }

    #[test]
    fn all_mode_needs_each_action_from_distinct_approvers() {
        let cfo = UserId::new();
        let s = planned(
            vec![manager(), ApproverAction::RequireUser { user_id: cfo }],
            ApprovalMode::All,
        );
        let submitter = UserId::new();
        let m = UserId::new();

        let first = eligible_action(&s, &[], m, &[MemberRole::Manager], submitter).unwrap();
        assert_eq!(first, 0);
        let approvals = vec![RecordedApproval {
            step_no: 1,
            approver: m,
            action_index: first,
            comment: None,
        }];
        assert!(!is_step_complete(&s, &approvals));

        // the same person cannot satisfy a second action
        assert!(matches!(
            eligible_action(&s, &approvals, m, &[MemberRole::Manager], submitter),
            Err(DomainError::Conflict(_))
        ));
        // a second manager has nothing left to satisfy
        assert_eq!(
            eligible_action(&s, &approvals, UserId::new(), &[MemberRole::Manager], submitter),
            Err(DomainError::Unauthorized)
        );

        let second = eligible_action(&s, &approvals, cfo, &[], submitter).unwrap();
        assert_eq!(second, 1);
        let mut approvals = approvals;
        approvals.push(RecordedApproval {
            step_no: 1,
            approver: cfo,
            action_index: second,
            comment: Some("ok".into()),
        });
        assert!(is_step_complete(&s, &approvals));
    }

    #[test]
    fn any_mode_completes_on_first_approval() {
        let s = planned(vec![manager(), ApproverAction::RequireUser { user_id: UserId::new() }], ApprovalMode::Any);
        let approvals = vec![RecordedApproval {
            step_no: 1,
            approver: UserId::new(),
            action_index: 0,
            comment: None,
        }];
        assert!(is_step_complete(&s, &approvals));
    }

    proptest! {
        #[test]
        fn selected_workflow_has_maximal_priority_among_applicable(
            specs in prop::collection::vec((any::<bool>(), -5i32..5, prop::option::of(0u64..2_000)), 1..8),
            amount in 0u64..2_000,
        ) {
            let workflows: Vec<WorkflowDefinition> = specs
                .iter()
                .enumerate()
                .map(|(i, (active, priority, min))| {
                    let conditions = min
                        .map(|m| vec![StepCondition::AmountRange { min: Some(m), max: None }])
                        .unwrap_or_default();
                    let mut wf = workflow(
                        ordered_workflow_id(i as u8 + 1),
                        *priority,
                        vec![step(1, conditions, vec![manager()], ApprovalMode::Any)],
                    );
                    wf.active = *active;
                    wf
                })
                .collect();
            let f = facts(amount);
            let applicable: Vec<&WorkflowDefinition> = workflows
                .iter()
                .filter(|w| w.active && w.steps.iter().any(|s| s.applies_to(&f)))
                .collect();

            match select_plan(&workflows, &f) {
                None => prop_assert!(applicable.is_empty()),
                Some(plan) => {
                    let chosen = workflows.iter().find(|w| w.workflow_id == plan.workflow_id).unwrap();
                    prop_assert!(applicable.iter().any(|w| w.workflow_id == chosen.workflow_id));
                    for w in &applicable {
                        prop_assert!(w.priority <= chosen.priority);
                        if w.priority == chosen.priority {
                            prop_assert!(chosen.workflow_id <= w.workflow_id);
                        }
                    }
                }
            }
        }
    }
}
