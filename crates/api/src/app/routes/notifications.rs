use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use uuid::Uuid;

use super::common::{parse_id, require};
use crate::app::{dto, errors, services::AppServices};
use crate::context::{OrganizationContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_notifications))
        .route("/:id/read", post(mark_read))
}

/// Notifications addressed to the caller or any of the caller's roles.
pub async fn list_notifications(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::NotificationsQuery>,
) -> Result<Response, Response> {
    require(&organization, &principal, "notifications.read")?;
    let items = services.notifications.list_for(
        organization.organization_id(),
        principal.user_id(),
        &principal.member_roles(),
        query.unread,
    );
    Ok(Json(serde_json::json!({ "items": items })).into_response())
}

pub async fn mark_read(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require(&organization, &principal, "notifications.read")?;
    let notification_id: Uuid = parse_id(&id, "notification")?;
    if services.notifications.mark_read(
        organization.organization_id(),
        notification_id,
        principal.user_id(),
        &principal.member_roles(),
    ) {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(errors::not_found("notification"))
    }
}
