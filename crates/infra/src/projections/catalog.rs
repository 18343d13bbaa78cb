use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use shopledger_catalog::{ProductEvent, ProductId, ProductStatus, ValuationMethod, Variant, VariantId};
use shopledger_core::{Amount, OrganizationId};
use shopledger_events::EventEnvelope;
use shopledger_organization::{CategoryId, normalize_name};

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_scope};
use crate::read_model::OrgStore;
use crate::streams;

/// Queryable product catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub unit_price: Amount,
    pub valuation: ValuationMethod,
    pub reorder_level: i64,
    pub status: ProductStatus,
    pub variants: Vec<Variant>,
    pub created_at: DateTime<Utc>,
}

impl ProductReadModel {
    /// Variant price falls back to the product price.
    pub fn price_for(&self, variant_id: Option<VariantId>) -> Option<Amount> {
        match variant_id {
            None => Some(self.unit_price),
            Some(id) => self
                .variants
                .iter()
                .find(|v| v.variant_id == id)
                .map(|v| v.unit_price.unwrap_or(self.unit_price)),
        }
    }

    fn uses_sku(&self, normalized: &str) -> bool {
        normalize_name(&self.sku) == normalized
            || self.variants.iter().any(|v| normalize_name(&v.sku) == normalized)
    }
}

#[derive(Debug)]
pub struct CatalogProjection<S>
where
    S: OrgStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> CatalogProjection<S>
where
    S: OrgStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, organization_id: OrganizationId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(organization_id, product_id)
    }

    /// Products of one organization, ordered by SKU.
    pub fn list(&self, organization_id: OrganizationId) -> Vec<ProductReadModel> {
        let mut products = self.store.list(organization_id);
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        products
    }

    /// Product using `sku` as its own or one of its variants' SKU (case-insensitive).
    pub fn find_by_sku(&self, organization_id: OrganizationId, sku: &str) -> Option<ProductReadModel> {
        let normalized = normalize_name(sku);
        self.store
            .list(organization_id)
            .into_iter()
            .find(|p| p.uses_sku(&normalized))
    }

    fn apply_event(&self, organization_id: OrganizationId, event: ProductEvent) {
        if let ProductEvent::ProductCreated(e) = event {
            self.store.upsert(
                organization_id,
                e.product_id,
                ProductReadModel {
                    product_id: e.product_id,
                    sku: e.sku,
                    name: e.name,
                    category_id: e.category_id,
                    unit_price: e.unit_price,
                    valuation: e.valuation,
                    reorder_level: e.reorder_level,
                    status: ProductStatus::Draft,
                    variants: Vec::new(),
                    created_at: e.occurred_at,
                },
            );
            return;
        }

        let product_id = product_of(&event);
        let Some(mut rm) = self.store.get(organization_id, &product_id) else {
            tracing::warn!(%product_id, "product event before creation; skipped");
            return;
        };

        match event {
            ProductEvent::ProductCreated(_) => {}
            ProductEvent::VariantAdded(e) => rm.variants.push(Variant {
                variant_id: e.variant_id,
                sku: e.sku,
                name: e.name,
                unit_price: e.unit_price,
            }),
            ProductEvent::PriceUpdated(e) => match e.variant_id {
                None => rm.unit_price = e.unit_price,
                Some(id) => {
                    if let Some(v) = rm.variants.iter_mut().find(|v| v.variant_id == id) {
                        v.unit_price = Some(e.unit_price);
                    }
                }
            },
            ProductEvent::ProductActivated(_) => rm.status = ProductStatus::Active,
            ProductEvent::ProductArchived(_) => rm.status = ProductStatus::Archived,
        }

        self.store.upsert(organization_id, product_id, rm);
    }
}

fn product_of(event: &ProductEvent) -> ProductId {
    match event {
        ProductEvent::ProductCreated(e) => e.product_id,
        ProductEvent::VariantAdded(e) => e.product_id,
        ProductEvent::PriceUpdated(e) => e.product_id,
        ProductEvent::ProductActivated(e) => e.product_id,
        ProductEvent::ProductArchived(e) => e.product_id,
    }
}

fn organization_of(event: &ProductEvent) -> OrganizationId {
    match event {
        ProductEvent::ProductCreated(e) => e.organization_id,
        ProductEvent::VariantAdded(e) => e.organization_id,
        ProductEvent::PriceUpdated(e) => e.organization_id,
        ProductEvent::ProductActivated(e) => e.organization_id,
        ProductEvent::ProductArchived(e) => e.organization_id,
    }
}

impl<S> Projection for CatalogProjection<S>
where
    S: OrgStore<ProductId, ProductReadModel>,
{
    fn name(&self) -> &'static str {
        "catalog"
    }

    fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == streams::PRODUCT
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if !self.handles(envelope.aggregate_type()) {
            return Ok(());
        }

        self.cursors.apply_once(envelope, || {
            let event: ProductEvent = decode(envelope)?;
            let organization_id = organization_of(&event);
            ensure_scope(envelope, organization_id, product_of(&event).0)?;
            self.apply_event(organization_id, event);
            Ok(())
        })?;

        Ok(())
    }

    fn reset(&self, organization_id: OrganizationId) {
        self.cursors.reset_organization(organization_id);
        self.store.clear_organization(organization_id);
    }
}
