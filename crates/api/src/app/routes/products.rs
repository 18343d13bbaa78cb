use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;

use shopledger_catalog::{
    ActivateProduct, AddVariant, ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId, UpdatePrice,
    VariantId,
};
use shopledger_core::OrganizationId;
use shopledger_infra::{event_store::StoredEvent, streams};
use shopledger_organization::CategoryKind;

use super::common::{authorized, body, committed, ensure_category, load_organization, parse_id, require};
use crate::app::{dto, errors, services::AppServices};
use crate::context::{OrganizationContext, PrincipalContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/:id", get(get_product))
        .route("/:id/variants", post(add_variant))
        .route("/:id/price", put(update_price))
        .route("/:id/activate", post(activate_product))
        .route("/:id/archive", post(archive_product))
}

fn dispatch(
    services: &AppServices,
    organization_id: OrganizationId,
    product_id: ProductId,
    cmd: ProductCommand,
) -> Result<Vec<StoredEvent>, Response> {
    services
        .dispatch::<Product>(organization_id, product_id.0, streams::PRODUCT, cmd, |_, id| {
            Product::empty(ProductId::new(id))
        })
        .map_err(errors::dispatch_error_to_response)
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreateProductRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let req = body(payload)?;
    let organization_id = organization.organization_id();
    let product_id = ProductId::generate();

    let cmd = ProductCommand::CreateProduct(CreateProduct {
        organization_id,
        product_id,
        sku: req.sku,
        name: req.name,
        category_id: req.category_id,
        unit_price: req.unit_price,
        valuation: req.valuation,
        reorder_level: req.reorder_level,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "products.write")?;

    if let ProductCommand::CreateProduct(create) = &cmd {
        if services.catalog.find_by_sku(organization_id, &create.sku).is_some() {
            return Err(errors::json_error(
                StatusCode::CONFLICT,
                "duplicate",
                format!("sku '{}' already exists", create.sku.trim()),
            ));
        }
        if let Some(category_id) = create.category_id {
            let org = load_organization(&services, organization_id)?;
            ensure_category(&org, CategoryKind::Product, category_id)?;
        }
    }

    let events = dispatch(&services, organization_id, product_id, cmd)?;
    Ok(committed(StatusCode::CREATED, product_id, &events))
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require(&organization, &principal, "products.read")?;
    let items = services.catalog.list(organization.organization_id());
    Ok(Json(serde_json::json!({ "items": items })).into_response())
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require(&organization, &principal, "products.read")?;
    let product_id: ProductId = parse_id(&id, "product")?;
    services
        .catalog
        .get(organization.organization_id(), &product_id)
        .map(|rm| Json(rm).into_response())
        .ok_or_else(|| errors::not_found("product"))
}

pub async fn add_variant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::AddVariantRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let product_id: ProductId = parse_id(&id, "product")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();
    let variant_id = VariantId::generate();

    let cmd = ProductCommand::AddVariant(AddVariant {
        organization_id,
        product_id,
        variant_id,
        sku: req.sku,
        name: req.name,
        unit_price: req.unit_price,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "products.write")?;

    if let ProductCommand::AddVariant(add) = &cmd {
        if services.catalog.find_by_sku(organization_id, &add.sku).is_some() {
            return Err(errors::json_error(
                StatusCode::CONFLICT,
                "duplicate",
                format!("sku '{}' already exists", add.sku.trim()),
            ));
        }
    }

    let events = dispatch(&services, organization_id, product_id, cmd)?;
    Ok(committed(StatusCode::CREATED, variant_id, &events))
}

pub async fn update_price(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::UpdatePriceRequest>, JsonRejection>,
) -> Result<Response, Response> {
    let product_id: ProductId = parse_id(&id, "product")?;
    let req = body(payload)?;
    let organization_id = organization.organization_id();

    let cmd = ProductCommand::UpdatePrice(UpdatePrice {
        organization_id,
        product_id,
        variant_id: req.variant_id,
        unit_price: req.unit_price,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "products.write")?;

    let events = dispatch(&services, organization_id, product_id, cmd)?;
    Ok(committed(StatusCode::OK, product_id, &events))
}

pub async fn activate_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let product_id: ProductId = parse_id(&id, "product")?;
    let organization_id = organization.organization_id();

    let cmd = ProductCommand::ActivateProduct(ActivateProduct {
        organization_id,
        product_id,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "products.write")?;

    let events = dispatch(&services, organization_id, product_id, cmd)?;
    Ok(committed(StatusCode::OK, product_id, &events))
}

pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<OrganizationContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let product_id: ProductId = parse_id(&id, "product")?;
    let organization_id = organization.organization_id();

    let cmd = ProductCommand::ArchiveProduct(ArchiveProduct {
        organization_id,
        product_id,
        occurred_at: Utc::now(),
    });
    let cmd = authorized(&organization, &principal, cmd, "products.write")?;

    let events = dispatch(&services, organization_id, product_id, cmd)?;
    Ok(committed(StatusCode::OK, product_id, &events))
}
