use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopledger_core::{AggregateId, OrganizationId};

/// Envelope for an event, containing organization + stream metadata.
///
/// This is the unit published on the bus.
///
/// - **Multi-tenancy** is enforced via `organization_id`.
/// - `sequence_number` increases monotonically per stream, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    organization_id: OrganizationId,

    aggregate_id: AggregateId,
    aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            organization_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Identity of the stream this envelope belongs to. Streams never cross
    /// organizations, so the organization is part of the key.
    pub fn stream_key(&self) -> (OrganizationId, AggregateId) {
        (self.organization_id, self.aggregate_id)
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_pairs_organization_and_aggregate() {
        let org = OrganizationId::new();
        let agg = AggregateId::new();
        let env = EventEnvelope::new(Uuid::now_v7(), org, agg, "sales.sale", 3, "payload");
        assert_eq!(env.stream_key(), (org, agg));
        assert_eq!(env.into_payload(), "payload");
    }
}
