use std::collections::HashMap;
use std::sync::RwLock;

use shopledger_core::{AggregateId, ExpectedVersion, OrganizationId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<StreamKey, Vec<StoredEvent>>,
    /// Global append order as (stream, index into that stream).
    log: Vec<(StreamKey, usize)>,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(vec![]);
        };

        // All events must target the same organization + aggregate stream.
        let organization_id = first.organization_id;
        let aggregate_id = first.aggregate_id;
        let aggregate_type = first.aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.organization_id != organization_id {
                return Err(EventStoreError::OrganizationIsolation(format!(
                    "batch contains multiple organization_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let key = StreamKey {
            organization_id,
            aggregate_id,
        };

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;
        let Inner { streams, log } = &mut *inner;

        let stream = streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                organization_id: e.organization_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            log.push((key, stream.len()));
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            organization_id,
            aggregate_id,
        };

        let inner = self
            .inner
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(inner.streams.get(&key).cloned().unwrap_or_default())
    }

    fn all_events(&self, organization_id: OrganizationId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(inner
            .log
            .iter()
            .filter(|(key, _)| key.organization_id == organization_id)
            .filter_map(|(key, idx)| inner.streams.get(key).and_then(|s| s.get(*idx)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn event(org: OrganizationId, agg: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            organization_id: org,
            aggregate_id: agg,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    #[test]
    fn sequence_numbers_continue_per_stream() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let agg = AggregateId::new();

        let first = store
            .append(vec![event(org, agg, "t"), event(org, agg, "t")], ExpectedVersion::Exact(0))
            .unwrap();
        let second = store.append(vec![event(org, agg, "t")], ExpectedVersion::Exact(2)).unwrap();

        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second[0].sequence_number, 3);
    }

    #[test]
    fn stale_expected_version_is_rejected() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let agg = AggregateId::new();
        store.append(vec![event(org, agg, "t")], ExpectedVersion::Exact(0)).unwrap();

        let err = store.append(vec![event(org, agg, "t")], ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn mixed_organizations_in_one_batch_are_rejected() {
        let store = InMemoryEventStore::new();
        let agg = AggregateId::new();
        let err = store
            .append(
                vec![event(OrganizationId::new(), agg, "t"), event(OrganizationId::new(), agg, "t")],
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::OrganizationIsolation(_)));
    }

    #[test]
    fn aggregate_type_is_fixed_by_first_event() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let agg = AggregateId::new();
        store.append(vec![event(org, agg, "a")], ExpectedVersion::Any).unwrap();

        let err = store.append(vec![event(org, agg, "b")], ExpectedVersion::Any).unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn streams_are_invisible_to_other_organizations() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let agg = AggregateId::new();
        store.append(vec![event(org, agg, "t")], ExpectedVersion::Any).unwrap();

        assert!(store.load_stream(OrganizationId::new(), agg).unwrap().is_empty());
        assert_eq!(store.load_stream(org, agg).unwrap().len(), 1);
    }

    #[test]
    fn all_events_preserves_append_order_across_streams() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let other = OrganizationId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        let e1 = store.append(vec![event(org, a, "t")], ExpectedVersion::Any).unwrap();
        store.append(vec![event(other, a, "t")], ExpectedVersion::Any).unwrap();
        let e2 = store.append(vec![event(org, b, "t")], ExpectedVersion::Any).unwrap();
        let e3 = store.append(vec![event(org, a, "t")], ExpectedVersion::Any).unwrap();

        let ids: Vec<Uuid> = store.all_events(org).unwrap().into_iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![e1[0].event_id, e2[0].event_id, e3[0].event_id]);
    }
}
