use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;

use shopledger_core::OrganizationId;
use shopledger_expenses::{
    ApproveExpense, CancelExpense, CreateExpense, Expense, ExpenseCommand, ExpenseId, MarkExpensePaid,
    RejectExpense, SubmitExpense, UpdateExpense, select_plan,
};
use shopledger_infra::{event_store::StoredEvent, streams};
use shopledger_organization::{CategoryId, CategoryKind, LocationId, Organization};

use super::common::{
    authorized, body, committed, ensure_category, ensure_location, load_organization, parse_id, require,
};
use crate::app::{dto, errors, services::AppServices};
use crate::context::{OrganizationContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_expense).get(list_expenses))
        .route("/awaiting", get(awaiting_my_approval))
        .route("/:id", get(get_expense).put(update_expense))
        .route("/:id/submit", post(submit_expense))
        .route("/:id/approve", post(approve_expense))
        .route("/:id/reject", post(reject_expense))
        .route("/:id/cancel", post(cancel_expense))
        .route("/:id/pay", post(pay_expense))
}

fn dispatch(
    services: &AppServices,
    organization_id: OrganizationId,
    expense_id: ExpenseId,
    cmd: ExpenseCommand,
) -> Result<Vec<StoredEvent>, Response> {
    services
        .dispatch::<Expense>(organization_id, expense_id.0, streams::EXPENSE, cmd, |_, id| {
            Expense::empty(ExpenseId::new(id))
        })
        .map_err(errors::dispatch_error_to_response)
}

fn ensure_expense_references(
    organization: &Organization,
    category_id: Option<CategoryId>,
    location_id: Option<LocationId>,
) -> Result<(), Response> {
    if let Some(category_id) = category_id {
        ensure_category(organization, CategoryKind::Expense, category_id)?;
    }
    if let Some(location_id) = location_id {
        ensure_location(organization, location_id)?;
    }
    Ok(())
}

pub async fn create_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreateExpenseRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    let organization_id = organization.organization_id();
    let expense_id = ExpenseId::generate();

    let cmd = ExpenseCommand::CreateExpense(CreateExpense {
        organization_id,
        expense_id,
        title: req.title,
        amount: req.amount,
        category_id: req.category_id,
        location_id: req.location_id,
        spent_on: req.spent_on,
        created_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "expenses.create")?;

    let org = load_organization(&services, organization_id)?;
    ensure_expense_references(&org, Some(req.category_id), Some(req.location_id))?;

    let events = dispatch(&services, organization_id, expense_id, cmd)?;
    Ok(committed(StatusCode::CREATED, expense_id, &events))
}

pub async fn list_expenses(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ExpensesQuery>,
) -> Result<Response, Response> {
    require(&organization, &principal, "expenses.read")?;
    let items = services.expenses.list(organization.organization_id(), query.status);
    Ok(Json(serde_json::json!({ "items": items })).into_response())
}

/// Pending expenses whose current step the caller may approve.
pub async fn awaiting_my_approval(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require(&organization, &principal, "expenses.read")?;
    let items = services.expenses.awaiting(
        organization.organization_id(),
        principal.user_id(),
        &principal.member_roles(),
    );
    Ok(Json(serde_json::json!({ "items": items })).into_response())
}

pub async fn get_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require(&organization, &principal, "expenses.read")?;
    let expense_id: ExpenseId = parse_id(&id, "expense")?;
    services
        .expenses
        .get(organization.organization_id(), &expense_id)
        .map(|rm| Json(rm).into_response())
        .ok_or_else(|| errors::not_found("expense"))
}

pub async fn update_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::UpdateExpenseRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let expense_id: ExpenseId = parse_id(&id, "expense")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = ExpenseCommand::UpdateExpense(UpdateExpense {
        organization_id,
        expense_id,
        title: req.title,
        amount: req.amount,
        category_id: req.category_id,
        location_id: req.location_id,
        spent_on: req.spent_on,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "expenses.create")?;

    if req.category_id.is_some() || req.location_id.is_some() {
        let org = load_organization(&services, organization_id)?;
        ensure_expense_references(&org, req.category_id, req.location_id)?;
    }

    let events = dispatch(&services, organization_id, expense_id, cmd)?;
    Ok(committed(StatusCode::OK, expense_id, &events))
}

/// Submit a draft: the approval plan is fixed now from the active workflows.
pub async fn submit_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let expense_id: ExpenseId = parse_id(&id, "expense")?;
    require(&organization, &principal, "expenses.create")?;
    let organization_id = organization.organization_id();

    let expense: Expense = services
        .load_existing(organization_id, expense_id.0, |_, id| Expense::empty(ExpenseId::new(id)))
        .map_err(errors::dispatch_error_to_response)?;
    let plan = expense
        .facts()
        .and_then(|facts| select_plan(&services.workflows.list(organization_id), &facts));
    tracing::debug!(
        %expense_id,
        workflow = plan.as_ref().map(|p| p.workflow_name.as_str()).unwrap_or("none"),
        "approval plan selected"
    );

    let cmd = ExpenseCommand::SubmitExpense(SubmitExpense {
        organization_id,
        expense_id,
        by: principal.user_id(),
        plan,
        occurred_at: Utc::now(),
    });

    let events = dispatch(&services, organization_id, expense_id, cmd)?;
    Ok(committed(StatusCode::OK, expense_id, &events))
}

pub async fn approve_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Option<Json<dto::ApproveExpenseRequest>>,
) -> Result<Response, Response> {
    let expense_id: ExpenseId = parse_id(&id, "expense")?;
    let req = payload.map(|Json(body)| body).unwrap_or_default();
    let organization_id = organization.organization_id();

    let cmd = ExpenseCommand::ApproveExpense(ApproveExpense {
        organization_id,
        expense_id,
        approver: principal.user_id(),
        roles: principal.member_roles(),
        comment: req.comment,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "expenses.approve")?;

    let events = dispatch(&services, organization_id, expense_id, cmd)?;
    Ok(committed(StatusCode::OK, expense_id, &events))
}

pub async fn reject_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let expense_id: ExpenseId = parse_id(&id, "expense")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = ExpenseCommand::RejectExpense(RejectExpense {
        organization_id,
        expense_id,
        approver: principal.user_id(),
        roles: principal.member_roles(),
        reason: req.reason,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "expenses.approve")?;

    let events = dispatch(&services, organization_id, expense_id, cmd)?;
    Ok(committed(StatusCode::OK, expense_id, &events))
}

pub async fn cancel_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let expense_id: ExpenseId = parse_id(&id, "expense")?;
    let organization_id = organization.organization_id();

    let cmd = ExpenseCommand::CancelExpense(CancelExpense {
        organization_id,
        expense_id,
        by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "expenses.create")?;

    let events = dispatch(&services, organization_id, expense_id, cmd)?;
    Ok(committed(StatusCode::OK, expense_id, &events))
}

pub async fn pay_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::PayExpenseRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let expense_id: ExpenseId = parse_id(&id, "expense")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = ExpenseCommand::MarkExpensePaid(MarkExpensePaid {
        organization_id,
        expense_id,
        reference: req.reference,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "expenses.pay")?;

    let events = dispatch(&services, organization_id, expense_id, cmd)?;
    Ok(committed(StatusCode::OK, expense_id, &events))
}
