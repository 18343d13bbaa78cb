//! Infrastructure layer: event store, command execution, read models,
//! projections and the stock reactor.
//!
//! Everything here is storage-agnostic and in-memory by default; a durable
//! backend only has to implement [`event_store::EventStore`].

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod reactors;
pub mod read_model;
pub mod streams;
pub mod workers;
