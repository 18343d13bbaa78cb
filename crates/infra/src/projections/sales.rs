use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use shopledger_core::{Amount, OrganizationId, UserId};
use shopledger_events::EventEnvelope;
use shopledger_organization::LocationId;
use shopledger_sales::{Payment, SaleEvent, SaleId, SaleItem, SaleStatus};

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_scope};
use crate::read_model::OrgStore;
use crate::streams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleReadModel {
    pub sale_id: SaleId,
    pub location_id: LocationId,
    pub cashier: UserId,
    pub customer_name: Option<String>,
    pub status: SaleStatus,
    pub items: Vec<SaleItem>,
    pub payments: Vec<Payment>,
    pub total: Amount,
    pub paid: Amount,
    pub change_due: Amount,
    pub void_reason: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl SaleReadModel {
    fn recompute(&mut self) {
        self.total = self.items.iter().map(|i| i.line_total).fold(0, Amount::saturating_add);
        self.paid = self.payments.iter().map(|p| p.amount).fold(0, Amount::saturating_add);
    }
}

/// Totals of completed sales over a period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SalesSummary {
    pub completed: usize,
    pub voided: usize,
    pub revenue: Amount,
}

#[derive(Debug)]
pub struct SalesProjection<S>
where
    S: OrgStore<SaleId, SaleReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SalesProjection<S>
where
    S: OrgStore<SaleId, SaleReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, organization_id: OrganizationId, sale_id: &SaleId) -> Option<SaleReadModel> {
        self.store.get(organization_id, sale_id)
    }

    /// Sales, newest first, optionally restricted to one location.
    pub fn list(&self, organization_id: OrganizationId, location_id: Option<LocationId>) -> Vec<SaleReadModel> {
        let mut sales: Vec<_> = self
            .store
            .list(organization_id)
            .into_iter()
            .filter(|s| location_id.is_none_or(|l| s.location_id == l))
            .collect();
        sales.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        sales
    }

    /// Completed and voided sales closed within `[from, to)`.
    pub fn summary(&self, organization_id: OrganizationId, from: DateTime<Utc>, to: DateTime<Utc>) -> SalesSummary {
        self.store
            .list(organization_id)
            .into_iter()
            .filter(|s| s.closed_at.is_some_and(|t| t >= from && t < to))
            .fold(SalesSummary::default(), |mut acc, s| {
                match s.status {
                    SaleStatus::Completed => {
                        acc.completed += 1;
                        acc.revenue = acc.revenue.saturating_add(s.total);
                    }
                    SaleStatus::Voided => acc.voided += 1,
                    SaleStatus::Open => {}
                }
                acc
            })
    }

    fn apply_event(&self, organization_id: OrganizationId, event: SaleEvent) {
        if let SaleEvent::SaleOpened(e) = event {
            self.store.upsert(
                organization_id,
                e.sale_id,
                SaleReadModel {
                    sale_id: e.sale_id,
                    location_id: e.location_id,
                    cashier: e.cashier,
                    customer_name: e.customer_name,
                    status: SaleStatus::Open,
                    items: Vec::new(),
                    payments: Vec::new(),
                    total: 0,
                    paid: 0,
                    change_due: 0,
                    void_reason: None,
                    opened_at: e.occurred_at,
                    closed_at: None,
                },
            );
            return;
        }

        let sale_id = sale_of(&event);
        let Some(mut rm) = self.store.get(organization_id, &sale_id) else {
            tracing::warn!(%sale_id, "sale event before the sale was opened; skipped");
            return;
        };

        match event {
            SaleEvent::SaleOpened(_) => {}
            SaleEvent::ItemAdded(e) => rm.items.push(e.item),
            SaleEvent::ItemRemoved(e) => rm.items.retain(|i| i.line_no != e.line_no),
            SaleEvent::PaymentRecorded(e) => rm.payments.push(e.payment),
            SaleEvent::SaleCompleted(e) => {
                rm.status = SaleStatus::Completed;
                rm.change_due = e.change_due;
                rm.closed_at = Some(e.occurred_at);
            }
            SaleEvent::SaleVoided(e) => {
                rm.status = SaleStatus::Voided;
                rm.void_reason = Some(e.reason);
                rm.closed_at = Some(e.occurred_at);
            }
        }

        rm.recompute();
        self.store.upsert(organization_id, sale_id, rm);
    }
}

fn sale_of(event: &SaleEvent) -> SaleId {
    match event {
        SaleEvent::SaleOpened(e) => e.sale_id,
        SaleEvent::ItemAdded(e) => e.sale_id,
        SaleEvent::ItemRemoved(e) => e.sale_id,
        SaleEvent::PaymentRecorded(e) => e.sale_id,
        SaleEvent::SaleCompleted(e) => e.sale_id,
        SaleEvent::SaleVoided(e) => e.sale_id,
    }
}

fn organization_of(event: &SaleEvent) -> OrganizationId {
    match event {
        SaleEvent::SaleOpened(e) => e.organization_id,
        SaleEvent::ItemAdded(e) => e.organization_id,
        SaleEvent::ItemRemoved(e) => e.organization_id,
        SaleEvent::PaymentRecorded(e) => e.organization_id,
        SaleEvent::SaleCompleted(e) => e.organization_id,
        SaleEvent::SaleVoided(e) => e.organization_id,
    }
}

impl<S> Projection for SalesProjection<S>
where
    S: OrgStore<SaleId, SaleReadModel>,
{
    fn name(&self) -> &'static str {
        "sales"
    }

    fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == streams::SALE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if !self.handles(envelope.aggregate_type()) {
            return Ok(());
        }

        self.cursors.apply_once(envelope, || {
            let event: SaleEvent = decode(envelope)?;
            ensure_scope(envelope, organization_of(&event), sale_of(&event).0)?;
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
