use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value as JsonValue;

use shopledger_core::{AggregateId, OrganizationId};
use shopledger_events::EventEnvelope;

use super::ProjectionError;

/// Last applied sequence number per (organization, aggregate) stream.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: Mutex<HashMap<(OrganizationId, AggregateId), u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `apply` for an envelope unless its stream cursor is already past it.
    ///
    /// The first envelope seen for a stream may have any positive sequence
    /// number; after that each envelope must be exactly `last + 1`. The cursor
    /// only advances when `apply` succeeds. Returns whether `apply` ran.
    pub fn apply_once<F>(&self, envelope: &EventEnvelope<JsonValue>, apply: F) -> Result<bool, ProjectionError>
    where
        F: FnOnce() -> Result<(), ProjectionError>,
    {
        let mut cursors = self
            .inner
            .lock()
            .map_err(|_| ProjectionError::Unavailable("cursor lock poisoned".to_string()))?;

        let key = envelope.stream_key();
        let last = cursors.get(&key).copied().unwrap_or(0);
        let seq = envelope.sequence_number();

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Redelivery or replay.
            return Ok(false);
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        apply()?;
        cursors.insert(key, seq);
        Ok(true)
    }

    pub fn position(&self, organization_id: OrganizationId, aggregate_id: AggregateId) -> u64 {
        self.inner
            .lock()
            .ok()
            .and_then(|c| c.get(&(organization_id, aggregate_id)).copied())
            .unwrap_or(0)
    }

    pub fn reset_organization(&self, organization_id: OrganizationId) {
        if let Ok(mut cursors) = self.inner.lock() {
            cursors.retain(|(o, _), _| *o != organization_id);
        }
    }
}
