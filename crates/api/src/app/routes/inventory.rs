use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use uuid::Uuid;

use shopledger_catalog::{Product, ProductId};
use shopledger_core::OrganizationId;
use shopledger_infra::{command_dispatcher::DispatchError, event_store::StoredEvent, streams};
use shopledger_inventory::{ConsumeStock, InventoryCommand, ReceiveStock, SetReorderLevel, StockItem, StockItemId};

use super::common::{
    authorized, body, committed, ensure_location, load_organization, parse_id, require, unknown_reference,
};
use crate::app::{dto, errors, services::AppServices};
use crate::context::{OrganizationContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/stock", get(list_stock))
        .route("/stock/low", get(low_stock))
        .route("/stock/:id", get(get_stock))
        .route("/stock/:id/reorder-level", put(set_reorder_level))
        .route("/receipts", post(receive_stock))
        .route("/adjustments", post(adjust_stock))
}

fn dispatch(
    services: &AppServices,
    organization_id: OrganizationId,
    stock_item_id: StockItemId,
    cmd: InventoryCommand,
) -> Result<Vec<StoredEvent>, Response> {
    services
        .dispatch::<StockItem>(organization_id, stock_item_id.0, streams::STOCK_ITEM, cmd, |_, id| {
            StockItem::empty(StockItemId::new(id))
        })
        .map_err(errors::dispatch_error_to_response)
}

fn load_product(services: &AppServices, organization_id: OrganizationId, product_id: ProductId) -> Result<Product, Response> {
    services
        .load_existing(organization_id, product_id.0, |_, id| Product::empty(ProductId::new(id)))
        .map_err(|e| match e {
            DispatchError::NotFound => unknown_reference("product"),
            e => errors::dispatch_error_to_response(e),
        })
}

pub async fn list_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require(&organization, &principal, "inventory.read")?;
    let items = services.stock.list(organization.organization_id());
    Ok(Json(serde_json::json!({ "items": items })).into_response())
}

pub async fn low_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require(&organization, &principal, "inventory.read")?;
    let items = services.stock.low_stock(organization.organization_id());
    Ok(Json(serde_json::json!({ "items": items })).into_response())
}

pub async fn get_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require(&organization, &principal, "inventory.read")?;
    let stock_item_id: StockItemId = parse_id(&id, "stock item")?;
    services
        .stock
        .get(organization.organization_id(), &stock_item_id)
        .map(|level| Json(level).into_response())
        .ok_or_else(|| errors::not_found("stock item"))
}

/// Receive a batch outside a purchase order (opening balances, transfers in).
pub async fn receive_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::ReceiveStockRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    require(&organization, &principal, "inventory.receive")?;
    let organization_id = organization.organization_id();
    let stock_item_id = StockItemId::derive(req.product_id, req.variant_id, req.location_id);

    let org = load_organization(&services, organization_id)?;
    ensure_location(&org, req.location_id)?;
    let product = load_product(&services, organization_id, req.product_id)?;
    if let Some(variant_id) = req.variant_id {
        if product.variant(variant_id).is_none() {
            return Err(unknown_reference("variant"));
        }
    }

    let cmd = InventoryCommand::ReceiveStock(ReceiveStock {
        organization_id,
        stock_item_id,
        product_id: req.product_id,
        variant_id: req.variant_id,
        location_id: req.location_id,
        batch_number: req.batch_number,
        quantity: req.quantity,
        unit_cost: req.unit_cost,
        expires_on: req.expires_on,
        reorder_level: product.reorder_level(),
        reference: req.reference.unwrap_or_else(|| format!("receipt:{}", Uuid::now_v7())),
        occurred_at: Utc::now(),
    });
    let events = dispatch(&services, organization_id, stock_item_id, cmd)?;
    Ok(committed(StatusCode::CREATED, stock_item_id, &events))
}

/// Manual write-off or correction; batches are drawn by the product's valuation method.
pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::AdjustStockRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    require(&organization, &principal, "inventory.adjust")?;
    let organization_id = organization.organization_id();
    let stock_item_id = StockItemId::derive(req.product_id, req.variant_id, req.location_id);

    let product = load_product(&services, organization_id, req.product_id)?;

    let cmd = ConsumeStock {
        organization_id,
        stock_item_id,
        quantity: req.quantity,
        method: product.valuation(),
        reason: req.reason,
        reference: req.reference.unwrap_or_else(|| format!("adjustment:{}", Uuid::now_v7())),
        occurred_at: Utc::now(),
    };

    let events = services
        .consume_stock(cmd)
        .map_err(errors::dispatch_error_to_response)?;
    Ok(committed(StatusCode::OK, stock_item_id, &events))
}

pub async fn set_reorder_level(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::ReorderLevelRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let stock_item_id: StockItemId = parse_id(&id, "stock item")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = InventoryCommand::SetReorderLevel(SetReorderLevel {
        organization_id,
        stock_item_id,
        level: req.level,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "inventory.adjust")?;

    let events = dispatch(&services, organization_id, stock_item_id, cmd)?;
    Ok(committed(StatusCode::OK, stock_item_id, &events))
}
