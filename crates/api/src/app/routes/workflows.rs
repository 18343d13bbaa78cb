use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::Utc;

use shopledger_core::OrganizationId;
use shopledger_expenses::{
    ActivateWorkflow, AddStep, ApprovalWorkflow, CreateWorkflow, DeactivateWorkflow, ExpenseFacts, RemoveStep,
    WorkflowCommand, WorkflowId, select_plan,
};
use shopledger_infra::{event_store::StoredEvent, streams};

use super::common::{authorized, body, committed, parse_id, require};
use crate::app::{dto, errors, services::AppServices};
use crate::context::{OrganizationContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_workflow).get(list_workflows))
        .route("/preview", post(preview))
        .route("/:id", get(get_workflow))
        .route("/:id/steps", post(add_step))
        .route("/:id/steps/:step_no", delete(remove_step))
        .route("/:id/activate", post(activate_workflow))
        .route("/:id/deactivate", post(deactivate_workflow))
}

fn dispatch(
    services: &AppServices,
    organization_id: OrganizationId,
    workflow_id: WorkflowId,
    cmd: WorkflowCommand,
) -> Result<Vec<StoredEvent>, Response> {
    services
        .dispatch::<ApprovalWorkflow>(organization_id, workflow_id.0, streams::APPROVAL_WORKFLOW, cmd, |_, id| {
            ApprovalWorkflow::empty(WorkflowId::new(id))
        })
        .map_err(errors::dispatch_error_to_response)
}

pub async fn create_workflow(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreateWorkflowRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    let organization_id = organization.organization_id();
    let workflow_id = WorkflowId::generate();

    let cmd = WorkflowCommand::CreateWorkflow(CreateWorkflow {
        organization_id,
        workflow_id,
        name: req.name,
        description: req.description,
        priority: req.priority,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "workflows.manage")?;

    if let WorkflowCommand::CreateWorkflow(create) = &cmd {
        if services.workflows.find_by_name(organization_id, &create.name).is_some() {
            return Err(errors::json_error(
                StatusCode::CONFLICT,
                "duplicate",
                format!("workflow '{}' already exists", create.name.trim()),
            ));
        }
    }

    let events = dispatch(&services, organization_id, workflow_id, cmd)?;
    Ok(committed(StatusCode::CREATED, workflow_id, &events))
}

pub async fn list_workflows(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require(&organization, &principal, "workflows.read")?;
    let items = services.workflows.list(organization.organization_id());
    Ok(Json(serde_json::json!({ "items": items })).into_response())
}

pub async fn get_workflow(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require(&organization, &principal, "workflows.read")?;
    let workflow_id: WorkflowId = parse_id(&id, "workflow")?;
    services
        .workflows
        .get(organization.organization_id(), &workflow_id)
        .map(|w| Json(w).into_response())
        .ok_or_else(|| errors::not_found("workflow"))
}

pub async fn add_step(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::AddStepRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let workflow_id: WorkflowId = parse_id(&id, "workflow")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = WorkflowCommand::AddStep(AddStep {
        organization_id,
        workflow_id,
        name: req.name,
        conditions: req.conditions,
        actions: req.actions,
        mode: req.mode,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "workflows.manage")?;

    let events = dispatch(&services, organization_id, workflow_id, cmd)?;
    Ok(committed(StatusCode::CREATED, workflow_id, &events))
}

pub async fn remove_step(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, step_no)): Path<(String, u32)>,
) -> Result<Response, Response> {
    let workflow_id: WorkflowId = parse_id(&id, "workflow")?;
    let organization_id = organization.organization_id();

    let cmd = WorkflowCommand::RemoveStep(RemoveStep {
        organization_id,
        workflow_id,
        step_no,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "workflows.manage")?;

    let events = dispatch(&services, organization_id, workflow_id, cmd)?;
    Ok(committed(StatusCode::OK, workflow_id, &events))
}

pub async fn activate_workflow(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let workflow_id: WorkflowId = parse_id(&id, "workflow")?;
    let organization_id = organization.organization_id();

    let cmd = WorkflowCommand::ActivateWorkflow(ActivateWorkflow {
        organization_id,
        workflow_id,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "workflows.manage")?;

    let events = dispatch(&services, organization_id, workflow_id, cmd)?;
    Ok(committed(StatusCode::OK, workflow_id, &events))
}

pub async fn deactivate_workflow(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let workflow_id: WorkflowId = parse_id(&id, "workflow")?;
    let organization_id = organization.organization_id();

    let cmd = WorkflowCommand::DeactivateWorkflow(DeactivateWorkflow {
        organization_id,
        workflow_id,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "workflows.manage")?;

    let events = dispatch(&services, organization_id, workflow_id, cmd)?;
    Ok(committed(StatusCode::OK, workflow_id, &events))
}

/// Which workflow and steps would gate an expense with these facts.
///
/// `plan` is `null` when no workflow applies (the expense would be approved on submission).
pub async fn preview(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::PreviewRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    require(&organization, &principal, "workflows.read")?;

    let facts = ExpenseFacts {
        amount: req.amount,
        category_id: req.category_id,
        location_id: req.location_id,
    };
    let plan = select_plan(&services.workflows.list(organization.organization_id()), &facts);
    let auto_approved = plan.is_none();
    Ok(Json(serde_json::json!({
        "plan": plan,
        "auto_approved": auto_approved,
    }))
    .into_response())
}
