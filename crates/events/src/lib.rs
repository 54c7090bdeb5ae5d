//! Events and in-process event distribution.
//!
//! Ledger and product mutations emit events; the service layer wraps them in
//! envelopes and publishes them after the availability cache has been brought
//! up to date, so subscribers never see a change before its cache update.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
