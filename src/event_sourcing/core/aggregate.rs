use uuid::Uuid;
use super::event::EventEnvelope;

// ============================================================================
// Aggregate Capability - Event Sourcing Core
// ============================================================================
//
// State is derived from events only. An aggregate starts as an empty shell
// bound to an id and is brought up to date by applying its stream in order.
//
// ============================================================================

/// Sentinel version of an aggregate that has not applied any event.
pub const NO_EVENTS_VERSION: i64 = -1;

pub trait Aggregate: Send + Sync {
    type Error;

    fn aggregate_id(&self) -> Uuid;

    /// Number of events applied, or `NO_EVENTS_VERSION` for a fresh shell.
    fn version(&self) -> i64;

    /// Apply one stored event. A payload that cannot be decoded is reported
    /// as an error for this call only.
    fn apply(&mut self, event: &EventEnvelope) -> Result<(), Self::Error>;

    /// Apply a sequence in stream order and return how many were applied.
    fn replay<'a, I>(&mut self, events: I) -> Result<usize, Self::Error>
    where
        I: IntoIterator<Item = &'a EventEnvelope>,
        Self: Sized,
    {
        let mut applied = 0;
        for event in events {
            self.apply(event)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Version to pass as the expected stream length on the next append.
    fn stream_length(&self) -> i64 {
        self.version().max(0)
    }
}
