//! Progress event model and publish contract.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventSink, SharedEventSink};
pub use types::{EventId, JobEvent};
