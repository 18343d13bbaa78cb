//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (organization-scoped)
//!   ↓
//! 2. Validate the loaded stream and rehydrate the aggregate
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Append events (optimistic concurrency at the loaded version)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! Publication happens only after a successful append. If publishing fails the
//! events are already durable, so delivery is at-least-once.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use shopledger_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, OrganizationId};
use shopledger_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version).
    #[error("concurrent modification: {0}")]
    Concurrency(String),
    /// Cross-organization or cross-aggregate stream mixing.
    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    InvariantViolation(String),
    /// Business-level conflict (e.g. already exists, already approved).
    #[error("{0}")]
    Conflict(String),
    /// Uniqueness violation within the organization.
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("not permitted")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    /// Historical payloads did not deserialize into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::OrganizationIsolation(msg) => DispatchError::OrganizationIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::Duplicate(msg) => DispatchError::Duplicate(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests and the API process share the same
/// pipeline with in-memory implementations.
///
/// Aggregates must be deterministic and side-effect free: the same history
/// always rehydrates the same state.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// `make_aggregate` builds the empty aggregate the history is applied to.
    /// Returns the committed events; an empty vector means the command was
    /// accepted without changing anything.
    ///
    /// A concurrent append between load and append surfaces as
    /// [`DispatchError::Concurrency`]; callers may reload and retry.
    pub fn dispatch<A>(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(OrganizationId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: shopledger_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (organization-scoped)
        let history = self.store.load_stream(organization_id, aggregate_id)?;
        validate_loaded_stream(organization_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(organization_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command)?;
        if decided.is_empty() {
            tracing::debug!(%aggregate_id, "command produced no events");
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    organization_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        tracing::debug!(
            %organization_id,
            %aggregate_id,
            aggregate_type = %aggregate_type,
            events = committed.len(),
            "command dispatched"
        );

        Ok(committed)
    }

    /// Rehydrate an aggregate from its stream without handling a command.
    ///
    /// Gives handlers a consistent view of one aggregate where the read models
    /// may still lag.
    pub fn load<A>(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(OrganizationId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(organization_id, aggregate_id)?;
        validate_loaded_stream(organization_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(organization_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // A buggy backend must not leak another organization's history into an aggregate.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.organization_id != organization_id {
            return Err(DispatchError::OrganizationIsolation(format!(
                "loaded stream contains wrong organization_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::OrganizationIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use shopledger_core::UserId;
    use shopledger_events::InMemoryEventBus;
    use shopledger_organization::{
        AddLocation, CreateOrganization, LocationId, Organization, OrganizationCommand,
    };

    use crate::event_store::InMemoryEventStore;
    use crate::streams;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn dispatcher() -> (CommandDispatcher<InMemoryEventStore, Bus>, Bus) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        (CommandDispatcher::new(InMemoryEventStore::new(), bus.clone()), bus)
    }

    fn create(org: OrganizationId) -> OrganizationCommand {
        OrganizationCommand::CreateOrganization(CreateOrganization {
            organization_id: org,
            name: "Corner Shop".into(),
            owner: UserId::new(),
            owner_name: "Owner".into(),
            occurred_at: Utc::now(),
        })
    }

    fn add_location(org: OrganizationId, name: &str) -> OrganizationCommand {
        OrganizationCommand::AddLocation(AddLocation {
            organization_id: org,
            location_id: LocationId::generate(),
            name: name.into(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn committed_events_are_published_after_append() {
        let (d, bus) = dispatcher();
        let sub = bus.subscribe();
        let org = OrganizationId::new();

        let committed = d
            .dispatch(org, org.into(), streams::ORGANIZATION, create(org), |o, _| Organization::empty(o))
            .unwrap();

        assert_eq!(committed.len(), 1);
        let env = sub.try_recv().unwrap();
        assert_eq!(env.event_id(), committed[0].event_id);
        assert_eq!(env.sequence_number(), 1);
    }

    #[test]
    fn history_is_replayed_before_handling() {
        let (d, _bus) = dispatcher();
        let org = OrganizationId::new();
        d.dispatch(org, org.into(), streams::ORGANIZATION, create(org), |o, _| Organization::empty(o))
            .unwrap();
        d.dispatch(org, org.into(), streams::ORGANIZATION, add_location(org, "Main"), |o, _| {
            Organization::empty(o)
        })
        .unwrap();

        let err = d
            .dispatch(org, org.into(), streams::ORGANIZATION, add_location(org, " main "), |o, _| {
                Organization::empty(o)
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::Duplicate(_)));

        let loaded: Organization = d.load(org, org.into(), |o, _| Organization::empty(o)).unwrap();
        assert_eq!(loaded.locations().len(), 1);
    }

    #[test]
    fn domain_errors_map_to_dispatch_errors() {
        let (d, _bus) = dispatcher();
        let org = OrganizationId::new();
        let err = d
            .dispatch(org, org.into(), streams::ORGANIZATION, add_location(org, "Main"), |o, _| {
                Organization::empty(o)
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));
    }
}
