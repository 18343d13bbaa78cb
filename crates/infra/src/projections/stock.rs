use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use shopledger_catalog::{ProductId, VariantId};
use shopledger_core::{Amount, OrganizationId};
use shopledger_events::EventEnvelope;
use shopledger_inventory::{InventoryEvent, StockBatch, StockItemId};
use shopledger_organization::LocationId;

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_scope};
use crate::read_model::OrgStore;
use crate::streams;

/// Current stock of one (product, variant, location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub stock_item_id: StockItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub location_id: LocationId,
    pub on_hand: i64,
    pub reorder_level: i64,
    /// Remaining quantity valued at each batch's unit cost.
    pub inventory_value: Amount,
    /// Batches that still hold stock, in receipt order.
    pub batches: Vec<StockBatch>,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    pub fn is_low(&self) -> bool {
        self.on_hand <= self.reorder_level
    }

    fn recompute(&mut self) {
        self.batches.retain(|b| b.quantity_remaining > 0);
        self.on_hand = self
            .batches
            .iter()
            .map(|b| b.quantity_remaining)
            .fold(0, i64::saturating_add);
        self.inventory_value = self
            .batches
            .iter()
            .map(|b| u64::try_from(b.quantity_remaining).unwrap_or(0).saturating_mul(b.unit_cost))
            .fold(0, Amount::saturating_add);
    }
}

#[derive(Debug)]
pub struct StockProjection<S>
where
    S: OrgStore<StockItemId, StockLevel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockProjection<S>
where
    S: OrgStore<StockItemId, StockLevel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, organization_id: OrganizationId, stock_item_id: &StockItemId) -> Option<StockLevel> {
        self.store.get(organization_id, stock_item_id)
    }

    pub fn list(&self, organization_id: OrganizationId) -> Vec<StockLevel> {
        let mut levels = self.store.list(organization_id);
        levels.sort_by_key(|l| (l.product_id, l.variant_id, l.location_id));
        levels
    }

    /// Stock items at or below their reorder level.
    pub fn low_stock(&self, organization_id: OrganizationId) -> Vec<StockLevel> {
        self.list(organization_id).into_iter().filter(StockLevel::is_low).collect()
    }

    /// Projected on-hand quantity; zero when nothing was ever received.
    pub fn on_hand(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        location_id: LocationId,
    ) -> i64 {
        let id = StockItemId::derive(product_id, variant_id, location_id);
        self.store.get(organization_id, &id).map(|l| l.on_hand).unwrap_or(0)
    }

    fn apply_event(&self, organization_id: OrganizationId, event: InventoryEvent) {
        if let InventoryEvent::StockItemOpened(e) = event {
            self.store.upsert(
                organization_id,
                e.stock_item_id,
                StockLevel {
                    stock_item_id: e.stock_item_id,
                    product_id: e.product_id,
                    variant_id: e.variant_id,
                    location_id: e.location_id,
                    on_hand: 0,
                    reorder_level: e.reorder_level,
                    inventory_value: 0,
                    batches: Vec::new(),
                    updated_at: e.occurred_at,
                },
            );
            return;
        }

        let stock_item_id = stock_item_of(&event);
        let Some(mut rm) = self.store.get(organization_id, &stock_item_id) else {
            tracing::warn!(%stock_item_id, "stock event before the item was opened; skipped");
            return;
        };

        match event {
            InventoryEvent::StockItemOpened(_) => {}
            InventoryEvent::BatchReceived(e) => {
                rm.batches.push(StockBatch {
                    receipt_seq: e.receipt_seq,
                    batch_number: e.batch_number,
                    quantity_received: e.quantity,
                    quantity_remaining: e.quantity,
                    unit_cost: e.unit_cost,
                    expires_on: e.expires_on,
                });
                rm.updated_at = e.occurred_at;
            }
            InventoryEvent::StockConsumed(e) => {
                for a in &e.allocations {
                    if let Some(b) = rm.batches.iter_mut().find(|b| b.receipt_seq == a.receipt_seq) {
                        b.quantity_remaining -= a.quantity;
                    }
                }
                rm.updated_at = e.occurred_at;
            }
            InventoryEvent::ReorderLevelSet(e) => {
                rm.reorder_level = e.level;
                rm.updated_at = e.occurred_at;
            }
        }

        rm.recompute();
        self.store.upsert(organization_id, stock_item_id, rm);
    }
}

pub(crate) fn stock_item_of(event: &InventoryEvent) -> StockItemId {
    match event {
        InventoryEvent::StockItemOpened(e) => e.stock_item_id,
        InventoryEvent::BatchReceived(e) => e.stock_item_id,
        InventoryEvent::StockConsumed(e) => e.stock_item_id,
        InventoryEvent::ReorderLevelSet(e) => e.stock_item_id,
    }
}

pub(crate) fn organization_of(event: &InventoryEvent) -> OrganizationId {
    match event {
        InventoryEvent::StockItemOpened(e) => e.organization_id,
        InventoryEvent::BatchReceived(e) => e.organization_id,
        InventoryEvent::StockConsumed(e) => e.organization_id,
        InventoryEvent::ReorderLevelSet(e) => e.organization_id,
    }
}

impl<S> Projection for StockProjection<S>
where
    S: OrgStore<StockItemId, StockLevel>,
{
    fn name(&self) -> &'static str {
        "stock"
    }

    fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == streams::STOCK_ITEM
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if !self.handles(envelope.aggregate_type()) {
            return Ok(());
        }

        self.cursors.apply_once(envelope, || {
            let event: InventoryEvent = decode(envelope)?;
            ensure_scope(envelope, organization_of(&event), stock_item_of(&event).0)?;
            self.apply_event(organization_of(&event), event);
            Ok(())
        })?;

        Ok(())
    }

    fn reset(&self, organization_id: OrganizationId) {
        self.cursors.reset_organization(organization_id);
        self.store.clear_organization(organization_id);
    }
}
