use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::event_sourcing::core::{Aggregate, EventEnvelope};

use super::event_store::{EventStore, EventStoreError, ExpectedVersion};

// ============================================================================
// Aggregate Store - load, replay, append
// ============================================================================
//
// Orchestrates: Event Store → Aggregate (replay) and Aggregate → Event Store
// (append with the replayed stream length as expected version).
//
// ============================================================================

#[derive(Clone)]
pub struct AggregateStore {
    event_store: Arc<dyn EventStore>,
}

impl AggregateStore {
    pub fn new(event_store: Arc<dyn EventStore>) -> Self {
        Self { event_store }
    }

    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.event_store
    }

    /// Load the stream of `aggregate` and apply every event to it.
    /// Returns how many events were replayed; 0 means a brand-new aggregate.
    pub async fn load_and_apply<A>(
        &self,
        ctx: &RequestContext,
        aggregate: &mut A,
    ) -> Result<usize, A::Error>
    where
        A: Aggregate,
        A::Error: From<EventStoreError>,
    {
        let aggregate_id = aggregate.aggregate_id();
        let events = self.event_store.load(ctx, aggregate_id).await?;

        let applied = aggregate.replay(&events)?;
        // Replayed events are consumed here and never handed back for append.
        drop(events);

        tracing::debug!(
            aggregate_id = %aggregate_id,
            applied = applied,
            version = aggregate.version(),
            "Replayed aggregate"
        );
        Ok(applied)
    }

    /// Append one new event for an aggregate hydrated through `load_and_apply`.
    pub async fn save<A>(
        &self,
        ctx: &RequestContext,
        aggregate: &A,
        event: EventEnvelope,
    ) -> Result<EventEnvelope, A::Error>
    where
        A: Aggregate,
        A::Error: From<EventStoreError>,
    {
        let aggregate_id: Uuid = aggregate.aggregate_id();
        let expected = aggregate.stream_length();

        let mut event = event;
        event.aggregate_version = expected + 1;

        self.event_store
            .append(ctx, aggregate_id, ExpectedVersion::Exact(expected), vec![event.clone()])
            .await?;
        Ok(event)
    }
}
