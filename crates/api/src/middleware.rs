use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use shopledger_auth::JwtValidator;
use shopledger_infra::command_dispatcher::DispatchError;
use shopledger_organization::Organization;

use crate::app::{errors, services::AppServices};
use crate::context::{OrganizationContext, PrincipalContext};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut()
        .insert(OrganizationContext::new(claims.organization_id));
    req.extensions_mut()
        .insert(PrincipalContext::new(claims.sub, claims.roles));

    Ok(next.run(req).await)
}

/// Swap the token's roles for the caller's current membership.
///
/// Non-members are refused. Until the organization exists, only its creation
/// (`POST /organization`) goes through, with the token's roles.
pub async fn membership_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let extensions = req.extensions();
    let (Some(organization), Some(principal)) = (
        extensions.get::<OrganizationContext>().copied(),
        extensions.get::<PrincipalContext>().cloned(),
    ) else {
        return Err(StatusCode::UNAUTHORIZED.into_response());
    };
    let organization_id = organization.organization_id();

    match services.load_existing(organization_id, organization_id.into(), |o, _| Organization::empty(o)) {
        Ok(org) => match principal.as_member(&org) {
            Some(member) => {
                req.extensions_mut().insert(member);
            }
            None => {
                tracing::debug!(%organization_id, user_id = %principal.user_id(), "caller is not a member");
                return Err(not_a_member());
            }
        },
        Err(DispatchError::NotFound) if creates_organization(req.method(), req.uri().path()) => {}
        Err(DispatchError::NotFound) => return Err(not_a_member()),
        Err(e) => return Err(errors::dispatch_error_to_response(e)),
    }

    Ok(next.run(req).await)
}

fn creates_organization(method: &Method, path: &str) -> bool {
    method == Method::POST && path.trim_end_matches('/') == "/organization"
}

fn not_a_member() -> Response {
    errors::json_error(
        StatusCode::FORBIDDEN,
        "not_a_member",
        "caller is not a member of this organization",
    )
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer(&headers), Ok("abc.def"));
    }

    #[test]
    fn only_organization_creation_skips_membership() {
        assert!(creates_organization(&Method::POST, "/organization"));
        assert!(creates_organization(&Method::POST, "/organization/"));
        assert!(!creates_organization(&Method::GET, "/organization"));
        assert!(!creates_organization(&Method::POST, "/organization/categories"));
    }

    #[test]
    fn missing_or_malformed_header_is_unauthorized() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), Err(StatusCode::UNAUTHORIZED));

        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), Err(StatusCode::UNAUTHORIZED));

        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&headers), Err(StatusCode::UNAUTHORIZED));
    }
}
