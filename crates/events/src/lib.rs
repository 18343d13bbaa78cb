//! Event primitives shared by every domain module: the `Event` contract, the
//! organization-scoped envelope and the pub/sub bus abstraction.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod scoped;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use scoped::OrganizationScoped;
