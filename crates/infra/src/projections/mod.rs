//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-optimized read
//! models. All projections are:
//! - **Rebuildable** from [`EventStore::all_events`]
//! - **Organization-isolated**: data is partitioned by organization
//! - **Idempotent**: per-stream cursors make at-least-once delivery safe

pub mod catalog;
pub mod cursor;
pub mod expenses;
pub mod notifications;
pub mod organizations;
pub mod purchases;
pub mod sales;
pub mod stock;
pub mod workflows;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use shopledger_core::{AggregateId, OrganizationId};
use shopledger_events::EventEnvelope;

use crate::event_store::{EventStore, EventStoreError};

pub use catalog::{CatalogProjection, ProductReadModel};
pub use cursor::StreamCursors;
pub use expenses::{ExpenseReadModel, ExpensesProjection};
pub use notifications::{
    Notification, NotificationKind, NotificationView, NotificationsProjection, Recipient,
};
pub use organizations::{OrganizationReadModel, OrganizationsProjection};
pub use purchases::{PurchaseOrderReadModel, PurchasesProjection};
pub use sales::{SaleReadModel, SalesProjection, SalesSummary};
pub use stock::{StockLevel, StockProjection};
pub use workflows::WorkflowsProjection;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize {aggregate_type} event: {message}")]
    Deserialize {
        aggregate_type: String,
        message: String,
    },

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("projection state unavailable: {0}")]
    Unavailable(String),
}

/// A read model fed from published envelopes.
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether envelopes of this aggregate type feed the projection.
    fn handles(&self, aggregate_type: &str) -> bool;

    /// Apply one envelope. Envelopes of unhandled aggregate types and replays
    /// at or below the stream cursor are ignored.
    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drop every record and cursor of one organization.
    fn reset(&self, organization_id: OrganizationId);

    /// Reset the organization, then replay its envelopes in order.
    fn rebuild(
        &self,
        organization_id: OrganizationId,
        envelopes: &[EventEnvelope<JsonValue>],
    ) -> Result<(), ProjectionError> {
        self.reset(organization_id);
        for env in envelopes
            .iter()
            .filter(|e| e.organization_id() == organization_id && self.handles(e.aggregate_type()))
        {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("projection {name} failed: {source}")]
    Projection {
        name: &'static str,
        #[source]
        source: ProjectionError,
    },
}

/// Outcome of an organization rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub events: usize,
    pub projections: Vec<&'static str>,
}

/// Every projection the process maintains, fed from one subscription.
#[derive(Clone, Default)]
pub struct ProjectionSet {
    projections: Vec<Arc<dyn Projection>>,
}

impl ProjectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projections.push(projection);
        self
    }

    /// Route an envelope to every projection that handles its aggregate type.
    ///
    /// A failing projection does not stop the others; failures are logged.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) {
        for p in self.projections.iter().filter(|p| p.handles(envelope.aggregate_type())) {
            if let Err(err) = p.apply_envelope(envelope) {
                tracing::warn!(
                    projection = p.name(),
                    event_id = %envelope.event_id(),
                    error = %err,
                    "projection failed to apply envelope"
                );
            }
        }
    }

    /// Rebuild every projection for one organization from the event store.
    pub fn rebuild<S: EventStore + ?Sized>(
        &self,
        store: &S,
        organization_id: OrganizationId,
    ) -> Result<RebuildReport, ReplayError> {
        let envelopes: Vec<_> = store
            .all_events(organization_id)?
            .iter()
            .map(|e| e.to_envelope())
            .collect();

        for p in &self.projections {
            p.rebuild(organization_id, &envelopes)
                .map_err(|source| ReplayError::Projection { name: p.name(), source })?;
        }

        tracing::info!(%organization_id, events = envelopes.len(), "projections rebuilt");

        Ok(RebuildReport {
            events: envelopes.len(),
            projections: self.projections.iter().map(|p| p.name()).collect(),
        })
    }
}

/// Deserialize the typed domain event carried by an envelope.
pub(crate) fn decode<E: DeserializeOwned>(envelope: &EventEnvelope<JsonValue>) -> Result<E, ProjectionError> {
    serde_json::from_value(envelope.payload().clone()).map_err(|e| ProjectionError::Deserialize {
        aggregate_type: envelope.aggregate_type().to_string(),
        message: e.to_string(),
    })
}

/// The event's own organization and aggregate must match its envelope.
pub(crate) fn ensure_scope(
    envelope: &EventEnvelope<JsonValue>,
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
) -> Result<(), ProjectionError> {
    if organization_id != envelope.organization_id() {
        return Err(ProjectionError::OrganizationIsolation(
            "event organization_id does not match envelope organization_id".to_string(),
        ));
    }
    if aggregate_id != envelope.aggregate_id() {
        return Err(ProjectionError::OrganizationIsolation(
            "event aggregate id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(())
}
