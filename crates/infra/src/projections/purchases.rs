use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use shopledger_core::{Amount, OrganizationId};
use shopledger_events::EventEnvelope;
use shopledger_organization::LocationId;
use shopledger_purchasing::{LineItem, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderStatus};

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_scope};
use crate::read_model::OrgStore;
use crate::streams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseOrderReadModel {
    pub order_id: PurchaseOrderId,
    pub supplier_name: String,
    pub location_id: LocationId,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<LineItem>,
    pub total_cost: Amount,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct PurchasesProjection<S>
where
    S: OrgStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PurchasesProjection<S>
where
    S: OrgStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, organization_id: OrganizationId, order_id: &PurchaseOrderId) -> Option<PurchaseOrderReadModel> {
        self.store.get(organization_id, order_id)
    }

    /// Orders, newest first, optionally filtered by status.
    pub fn list(
        &self,
        organization_id: OrganizationId,
        status: Option<PurchaseOrderStatus>,
    ) -> Vec<PurchaseOrderReadModel> {
        let mut orders: Vec<_> = self
            .store
            .list(organization_id)
            .into_iter()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    fn apply_event(&self, organization_id: OrganizationId, event: PurchaseOrderEvent) {
        if let PurchaseOrderEvent::PurchaseOrderCreated(e) = event {
            self.store.upsert(
                organization_id,
                e.order_id,
                PurchaseOrderReadModel {
                    order_id: e.order_id,
                    supplier_name: e.supplier_name,
                    location_id: e.location_id,
                    status: PurchaseOrderStatus::Draft,
                    lines: Vec::new(),
                    total_cost: 0,
                    cancel_reason: None,
                    created_at: e.occurred_at,
                    received_at: None,
                },
            );
            return;
        }

        let order_id = order_of(&event);
        let Some(mut rm) = self.store.get(organization_id, &order_id) else {
            tracing::warn!(%order_id, "purchase order event before creation; skipped");
            return;
        };

        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => {}
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                let line_cost = u64::try_from(e.line.quantity)
                    .unwrap_or(0)
                    .saturating_mul(e.line.unit_cost);
                rm.total_cost = rm.total_cost.saturating_add(line_cost);
                rm.lines.push(e.line);
            }
            PurchaseOrderEvent::PurchaseOrderApproved(_) => rm.status = PurchaseOrderStatus::Approved,
            PurchaseOrderEvent::GoodsReceived(e) => {
                rm.status = PurchaseOrderStatus::Received;
                rm.received_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => {
                rm.status = PurchaseOrderStatus::Cancelled;
                rm.cancel_reason = Some(e.reason);
            }
        }

        self.store.upsert(organization_id, order_id, rm);
    }
}

fn order_of(event: &PurchaseOrderEvent) -> PurchaseOrderId {
    match event {
        PurchaseOrderEvent::PurchaseOrderCreated(e) => e.order_id,
        PurchaseOrderEvent::PurchaseOrderLineAdded(e) => e.order_id,
        PurchaseOrderEvent::PurchaseOrderApproved(e) => e.order_id,
        PurchaseOrderEvent::GoodsReceived(e) => e.order_id,
        PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.order_id,
    }
}

fn organization_of(event: &PurchaseOrderEvent) -> OrganizationId {
    match event {
        PurchaseOrderEvent::PurchaseOrderCreated(e) => e.organization_id,
        PurchaseOrderEvent::PurchaseOrderLineAdded(e) => e.organization_id,
        PurchaseOrderEvent::PurchaseOrderApproved(e) => e.organization_id,
        PurchaseOrderEvent::GoodsReceived(e) => e.organization_id,
        PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.organization_id,
    }
}

impl<S> Projection for PurchasesProjection<S>
where
    S: OrgStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    fn name(&self) -> &'static str {
        "purchases"
    }

    fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == streams::PURCHASE_ORDER
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if !self.handles(envelope.aggregate_type()) {
            return Ok(());
        }

        self.cursors.apply_once(envelope, || {
            let event: PurchaseOrderEvent = decode(envelope)?;
            ensure_scope(envelope, organization_of(&event), order_of(&event).0)?;
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
