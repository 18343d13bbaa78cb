use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::Utc;

use shopledger_core::{OrganizationId, UserId};
use shopledger_infra::{event_store::StoredEvent, streams};
use shopledger_organization::{
    AddCategory, AddLocation, AddMember, CategoryId, ChangeMemberRole, CreateOrganization, LocationId,
    Organization, OrganizationCommand, RemoveMember,
};

use super::common::{authorized, body, committed, parse_id, require};
use crate::app::{dto, errors, services::AppServices};
use crate::context::{OrganizationContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_organization).get(get_organization))
        .route("/members", post(add_member))
        .route("/members/:user_id", delete(remove_member))
        .route("/members/:user_id/role", put(change_member_role))
        .route("/locations", post(add_location))
        .route("/categories", post(add_category))
}

fn dispatch(
    services: &AppServices,
    organization_id: OrganizationId,
    cmd: OrganizationCommand,
) -> Result<Vec<StoredEvent>, Response> {
    services
        .dispatch::<Organization>(organization_id, organization_id.into(), streams::ORGANIZATION, cmd, |o, _| {
            Organization::empty(o)
        })
        .map_err(errors::dispatch_error_to_response)
}

/// Create the organization named by the token; the caller becomes its owner.
pub async fn create_organization(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreateOrganizationRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = OrganizationCommand::CreateOrganization(CreateOrganization {
        organization_id,
        name: req.name,
        owner: principal.user_id(),
        owner_name: req.owner_name,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "organization.manage")?;

    let events = dispatch(&services, organization_id, cmd)?;
    Ok(committed(StatusCode::CREATED, organization_id, &events))
}

pub async fn get_organization(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require(&organization, &principal, "organization.read")?;
    services
        .organizations
        .get(organization.organization_id())
        .map(|rm| Json(rm).into_response())
        .ok_or_else(|| errors::not_found("organization"))
}

pub async fn add_member(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::AddMemberRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = OrganizationCommand::AddMember(AddMember {
        organization_id,
        user_id: req.user_id,
        display_name: req.display_name,
        role: req.role,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "organization.manage")?;

    let events = dispatch(&services, organization_id, cmd)?;
    Ok(committed(StatusCode::CREATED, req.user_id, &events))
}

pub async fn change_member_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<String>,
    payload: Result<Json<dto::ChangeRoleRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let user_id: UserId = parse_id(&user_id, "user")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = OrganizationCommand::ChangeMemberRole(ChangeMemberRole {
        organization_id,
        user_id,
        role: req.role,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "organization.manage")?;

    let events = dispatch(&services, organization_id, cmd)?;
    Ok(committed(StatusCode::OK, user_id, &events))
}

pub async fn remove_member(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<String>,
) -> Result<Response, Response> {
    let user_id: UserId = parse_id(&user_id, "user")?;
    let organization_id = organization.organization_id();

    let cmd = OrganizationCommand::RemoveMember(RemoveMember {
        organization_id,
        user_id,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "organization.manage")?;

    let events = dispatch(&services, organization_id, cmd)?;
    Ok(committed(StatusCode::OK, user_id, &events))
}

pub async fn add_location(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::AddLocationRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    let organization_id = organization.organization_id();
    let location_id = LocationId::generate();

    let cmd = OrganizationCommand::AddLocation(AddLocation {
        organization_id,
        location_id,
        name: req.name,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "organization.manage")?;

    let events = dispatch(&services, organization_id, cmd)?;
    Ok(committed(StatusCode::CREATED, location_id, &events))
}

pub async fn add_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::AddCategoryRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    let organization_id = organization.organization_id();
    let category_id = CategoryId::generate();

    let cmd = OrganizationCommand::AddCategory(AddCategory {
        organization_id,
        category_id,
        kind: req.kind,
        name: req.name,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "organization.manage")?;

    let events = dispatch(&services, organization_id, cmd)?;
    Ok(committed(StatusCode::CREATED, category_id, &events))
}
