// ============================================================================
// Event Sourcing Core - Envelope, Aggregate Capability, Log Positions
// ============================================================================

pub mod aggregate;
pub mod event;

pub use aggregate::{Aggregate, NO_EVENTS_VERSION};
pub use event::{
    deserialize_event, serialize_event, DeliveredEvent, DomainEvent, EventEnvelope, LogPosition,
};
