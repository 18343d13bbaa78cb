use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;

use shopledger_catalog::{Product, ProductId};
use shopledger_core::OrganizationId;
use shopledger_infra::{command_dispatcher::DispatchError, event_store::StoredEvent, streams};
use shopledger_purchasing::{
    AddLine, Approve, Cancel, CreatePurchaseOrder, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderId,
    ReceiveGoods,
};

use super::common::{
    authorized, body, committed, ensure_location, load_organization, parse_id, require, unknown_reference,
};
use crate::app::{dto, errors, services::AppServices};
use crate::context::{OrganizationContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/lines", post(add_line))
        .route("/:id/approve", post(approve_order))
        .route("/:id/receive", post(receive_order))
        .route("/:id/cancel", post(cancel_order))
}

fn dispatch(
    services: &AppServices,
    organization_id: OrganizationId,
    order_id: PurchaseOrderId,
    cmd: PurchaseOrderCommand,
) -> Result<Vec<StoredEvent>, Response> {
    services
        .dispatch::<PurchaseOrder>(organization_id, order_id.0, streams::PURCHASE_ORDER, cmd, |_, id| {
            PurchaseOrder::empty(PurchaseOrderId::new(id))
        })
        .map_err(errors::dispatch_error_to_response)
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreatePurchaseOrderRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    let organization_id = organization.organization_id();
    let order_id = PurchaseOrderId::generate();

    let cmd = PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
        organization_id,
        order_id,
        supplier_name: req.supplier_name,
        location_id: req.location_id,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "purchases.write")?;

    let org = load_organization(&services, organization_id)?;
    ensure_location(&org, req.location_id)?;

    let events = dispatch(&services, organization_id, order_id, cmd)?;
    Ok(committed(StatusCode::CREATED, order_id, &events))
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::PurchasesQuery>,
) -> Result<Response, Response> {
    require(&organization, &principal, "purchases.read")?;
    let items = services.purchases.list(organization.organization_id(), query.status);
    Ok(Json(serde_json::json!({ "items": items })).into_response())
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require(&organization, &principal, "purchases.read")?;
    let order_id: PurchaseOrderId = parse_id(&id, "purchase order")?;
    services
        .purchases
        .get(organization.organization_id(), &order_id)
        .map(|rm| Json(rm).into_response())
        .ok_or_else(|| errors::not_found("purchase order"))
}

pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::PurchaseOrderLineRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let order_id: PurchaseOrderId = parse_id(&id, "purchase order")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = PurchaseOrderCommand::AddLine(AddLine {
        organization_id,
        order_id,
        product_id: req.product_id,
        variant_id: req.variant_id,
        quantity: req.quantity,
        unit_cost: req.unit_cost,
        batch_number: req.batch_number,
        expires_on: req.expires_on,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "purchases.write")?;

    let product: Product = services
        .load_existing(organization_id, req.product_id.0, |_, id| Product::empty(ProductId::new(id)))
        .map_err(|e| match e {
            DispatchError::NotFound => unknown_reference("product"),
            e => errors::dispatch_error_to_response(e),
        })?;
    if let Some(variant_id) = req.variant_id {
        if product.variant(variant_id).is_none() {
            return Err(unknown_reference("variant"));
        }
    }

    let events = dispatch(&services, organization_id, order_id, cmd)?;
    Ok(committed(StatusCode::OK, order_id, &events))
}

pub async fn approve_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let order_id: PurchaseOrderId = parse_id(&id, "purchase order")?;
    let organization_id = organization.organization_id();

    let cmd = PurchaseOrderCommand::Approve(Approve {
        organization_id,
        order_id,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "purchases.approve")?;

    let events = dispatch(&services, organization_id, order_id, cmd)?;
    Ok(committed(StatusCode::OK, order_id, &events))
}

/// Mark goods received; the stock reactor turns each line into a batch.
pub async fn receive_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let order_id: PurchaseOrderId = parse_id(&id, "purchase order")?;
    let organization_id = organization.organization_id();

    let cmd = PurchaseOrderCommand::ReceiveGoods(ReceiveGoods {
        organization_id,
        order_id,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "purchases.receive")?;

    let events = dispatch(&services, organization_id, order_id, cmd)?;
    Ok(committed(StatusCode::OK, order_id, &events))
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let order_id: PurchaseOrderId = parse_id(&id, "purchase order")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = PurchaseOrderCommand::Cancel(Cancel {
        organization_id,
        order_id,
        reason: req.reason,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "purchases.write")?;

    let events = dispatch(&services, organization_id, order_id, cmd)?;
    Ok(committed(StatusCode::OK, order_id, &events))
}
