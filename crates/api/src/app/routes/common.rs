//! Helpers shared by the route handlers.

use std::fmt::Display;
use std::str::FromStr;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use shopledger_auth::{CommandAuthorization, Permission};
use shopledger_core::OrganizationId;
use shopledger_infra::{command_dispatcher::DispatchError, event_store::StoredEvent};
use shopledger_organization::{CategoryId, CategoryKind, LocationId, Organization};

use crate::app::{errors, services::AppServices};
use crate::context::{OrganizationContext, PrincipalContext};

/// Small helper wrapper to associate required permissions with a command.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Authorize `command` against `permission` and hand it back for dispatch.
pub fn authorized<C>(
    organization: &OrganizationContext,
    principal: &PrincipalContext,
    command: C,
    permission: &'static str,
) -> Result<C, Response> {
    let cmd_auth = CmdAuth {
        inner: command,
        required: vec![Permission::new(permission)],
    };
    crate::authz::authorize_command(organization, principal, &cmd_auth).map_err(errors::authz_error_to_response)?;
    Ok(cmd_auth.inner)
}

/// Permission check for queries and for checks made before a command exists.
pub fn require(
    organization: &OrganizationContext,
    principal: &PrincipalContext,
    permission: &'static str,
) -> Result<(), Response> {
    crate::authz::authorize_permission(organization, principal, &Permission::new(permission))
        .map_err(errors::authz_error_to_response)
}

/// Unwrap a JSON body, turning extractor rejections into `400` JSON errors.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(body)| body)
        .map_err(errors::json_rejection_to_response)
}

/// Parse an id from a path segment.
pub fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

/// Standard command response: the aggregate id and how many events were committed.
pub fn committed(status: StatusCode, id: impl Display, committed: &[StoredEvent]) -> Response {
    (
        status,
        Json(serde_json::json!({
            "id": id.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

/// A referenced entity that does not exist in the organization.
pub fn unknown_reference(what: &str) -> Response {
    errors::json_error(
        StatusCode::BAD_REQUEST,
        "invalid_reference",
        format!("{what} does not exist in this organization"),
    )
}

/// Load the organization aggregate to check references against it.
pub fn load_organization(services: &AppServices, organization_id: OrganizationId) -> Result<Organization, Response> {
    services
        .load_existing(organization_id, organization_id.into(), |o, _| Organization::empty(o))
        .map_err(|e| match e {
            DispatchError::NotFound => unknown_reference("organization"),
            e => errors::dispatch_error_to_response(e),
        })
}

pub fn ensure_location(organization: &Organization, location_id: LocationId) -> Result<(), Response> {
    if organization.has_location(location_id) {
        Ok(())
    } else {
        Err(unknown_reference("location"))
    }
}

pub fn ensure_category(organization: &Organization, kind: CategoryKind, category_id: CategoryId) -> Result<(), Response> {
    if organization.has_category(kind, category_id) {
        Ok(())
    } else {
        Err(unknown_reference("category"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopledger_catalog::ProductId;

    #[test]
    fn invalid_path_ids_are_bad_requests() {
        let err = parse_id::<ProductId>("not-a-uuid", "product").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn valid_path_ids_parse() {
        let id = ProductId::generate();
        assert_eq!(parse_id::<ProductId>(&id.to_string(), "product").unwrap(), id);
    }
}
