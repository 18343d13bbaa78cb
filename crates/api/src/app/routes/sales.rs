use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::Utc;

use shopledger_catalog::{Product, ProductId, ProductStatus};
use shopledger_core::OrganizationId;
use shopledger_infra::{command_dispatcher::DispatchError, event_store::StoredEvent, reactors::CheckoutError, streams};
use shopledger_sales::{
    AddItem, CompleteSale, OpenSale, RecordPayment, RemoveItem, Sale, SaleCommand, SaleId, VoidSale,
};

use super::common::{
    authorized, body, committed, ensure_location, load_organization, parse_id, require, unknown_reference,
};
use crate::app::{dto, errors, services::AppServices};
use crate::context::{OrganizationContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_sale).get(list_sales))
        .route("/summary", get(sales_summary))
        .route("/:id", get(get_sale))
        .route("/:id/items", post(add_item))
        .route("/:id/items/:line_no", delete(remove_item))
        .route("/:id/payments", post(record_payment))
        .route("/:id/complete", post(complete_sale))
        .route("/:id/void", post(void_sale))
}

fn dispatch(
    services: &AppServices,
    organization_id: OrganizationId,
    sale_id: SaleId,
    cmd: SaleCommand,
) -> Result<Vec<StoredEvent>, Response> {
    services
        .dispatch::<Sale>(organization_id, sale_id.0, streams::SALE, cmd, |_, id| Sale::empty(SaleId::new(id)))
        .map_err(errors::dispatch_error_to_response)
}

pub async fn open_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::OpenSaleRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    let organization_id = organization.organization_id();
    let sale_id = SaleId::generate();

    let cmd = SaleCommand::OpenSale(OpenSale {
        organization_id,
        sale_id,
        location_id: req.location_id,
        cashier: principal.user_id(),
        customer_name: req.customer_name,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "sales.create")?;

    let org = load_organization(&services, organization_id)?;
    ensure_location(&org, req.location_id)?;

    let events = dispatch(&services, organization_id, sale_id, cmd)?;
    Ok(committed(StatusCode::CREATED, sale_id, &events))
}

pub async fn list_sales(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::SalesQuery>,
) -> Result<Response, Response> {
    require(&organization, &principal, "sales.read")?;
    let items = services.sales.list(organization.organization_id(), query.location_id);
    Ok(Json(serde_json::json!({ "items": items })).into_response())
}

pub async fn sales_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::SummaryQuery>,
) -> Result<Response, Response> {
    require(&organization, &principal, "sales.read")?;
    if query.from > query.to {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "from must not be after to",
        ));
    }
    let summary = services.sales.summary(organization.organization_id(), query.from, query.to);
    Ok(Json(summary).into_response())
}

pub async fn get_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require(&organization, &principal, "sales.read")?;
    let sale_id: SaleId = parse_id(&id, "sale")?;
    services
        .sales
        .get(organization.organization_id(), &sale_id)
        .map(|rm| Json(rm).into_response())
        .ok_or_else(|| errors::not_found("sale"))
}

/// Add a line priced from the catalog; only active products can be sold.
pub async fn add_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::AddSaleItemRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let sale_id: SaleId = parse_id(&id, "sale")?;
    let req = body(payload)?;
    require(&organization, &principal, "sales.create")?;
    let organization_id = organization.organization_id();

    let product: Product = services
        .load_existing(organization_id, req.product_id.0, |_, id| Product::empty(ProductId::new(id)))
        .map_err(|e| match e {
            DispatchError::NotFound => unknown_reference("product"),
            e => errors::dispatch_error_to_response(e),
        })?;
    if product.status() != ProductStatus::Active {
        return Err(errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invariant_violation",
            "product is not active",
        ));
    }
    let unit_price = product
        .price_for(req.variant_id)
        .map_err(|e| errors::dispatch_error_to_response(e.into()))?;
    let description = match req.variant_id.and_then(|v| product.variant(v)) {
        Some(variant) => format!("{} ({})", product.name(), variant.name),
        None => product.name().to_string(),
    };

    let cmd = SaleCommand::AddItem(AddItem {
        organization_id,
        sale_id,
        product_id: req.product_id,
        variant_id: req.variant_id,
        description,
        quantity: req.quantity,
        unit_price,
        discount: req.discount,
        occurred_at: Utc::now(),
    });

    let events = dispatch(&services, organization_id, sale_id, cmd)?;
    Ok(committed(StatusCode::OK, sale_id, &events))
}

pub async fn remove_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, line_no)): Path<(String, u32)>,
) -> Result<Response, Response> {
    let sale_id: SaleId = parse_id(&id, "sale")?;
    let organization_id = organization.organization_id();

    let cmd = SaleCommand::RemoveItem(RemoveItem {
        organization_id,
        sale_id,
        line_no,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "sales.create")?;

    let events = dispatch(&services, organization_id, sale_id, cmd)?;
    Ok(committed(StatusCode::OK, sale_id, &events))
}

pub async fn record_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::RecordPaymentRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let sale_id: SaleId = parse_id(&id, "sale")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = SaleCommand::RecordPayment(RecordPayment {
        organization_id,
        sale_id,
        method: req.method,
        amount: req.amount,
        reference: req.reference,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "sales.create")?;

    let events = dispatch(&services, organization_id, sale_id, cmd)?;
    Ok(committed(StatusCode::OK, sale_id, &events))
}

/// Complete a sale. Stock for every line is checked and consumed in the same
/// step; a sale that stock cannot cover stays open.
pub async fn complete_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let sale_id: SaleId = parse_id(&id, "sale")?;
    require(&organization, &principal, "sales.create")?;
    let organization_id = organization.organization_id();

    let checkout = services
        .complete_sale(CompleteSale {
            organization_id,
            sale_id,
            occurred_at: Utc::now(),
        })
        .map_err(|e| match e {
            err @ CheckoutError::InsufficientStock { .. } => errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_stock",
                err.to_string(),
            ),
            CheckoutError::Dispatch(e) => errors::dispatch_error_to_response(e),
        })?;
    if !checkout.reaction.failed.is_empty() {
        tracing::error!(
            %sale_id,
            failed = checkout.reaction.failed.len(),
            "completed sale left stock unconsumed"
        );
    }
    Ok(committed(StatusCode::OK, sale_id, &checkout.events))
}

pub async fn void_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let sale_id: SaleId = parse_id(&id, "sale")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = SaleCommand::VoidSale(VoidSale {
        organization_id,
        sale_id,
        reason: req.reason,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "sales.void")?;

    let events = dispatch(&services, organization_id, sale_id, cmd)?;
    Ok(committed(StatusCode::OK, sale_id, &events))
}
