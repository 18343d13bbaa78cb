//! Append-only event store boundary.
//!
//! Organization-scoped event streams behind a storage-agnostic trait, plus the
//! in-memory implementation used by the API process and tests.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
