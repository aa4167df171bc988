use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::event_sourcing::core::{DeliveredEvent, EventEnvelope, LogPosition};

use super::event_store::{
    check_expected, validate_append, CheckpointStore, EventStore, EventStoreError, ExpectedVersion,
};

// ============================================================================
// In-Memory Event Store
// ============================================================================
//
// Same contract as the Scylla store, held behind one RwLock. Used by tests
// and local runs. Log positions are strictly increasing even when the wall
// clock stalls.
//
// ============================================================================

#[derive(Default)]
struct Inner {
    streams: HashMap<Uuid, Vec<EventEnvelope>>,
    log: Vec<DeliveredEvent>,
    last_recorded_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn next_recorded_at(&mut self) -> DateTime<Utc> {
        let mut recorded_at = Utc::now();
        if let Some(last) = self.last_recorded_at {
            if recorded_at <= last {
                recorded_at = last + TimeDelta::microseconds(1);
            }
        }
        self.last_recorded_at = Some(recorded_at);
        recorded_at
    }
}

#[derive(Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
    checkpoints: RwLock<HashMap<String, LogPosition>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all streams.
    pub async fn len(&self) -> usize {
        self.inner.read().await.log.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        ctx: &RequestContext,
        aggregate_id: Uuid,
        expected: ExpectedVersion,
        events: Vec<EventEnvelope>,
    ) -> Result<i64, EventStoreError> {
        validate_append(aggregate_id, &events)?;
        ctx.check()?;

        let mut inner = self.inner.write().await;
        let current_version = inner
            .streams
            .get(&aggregate_id)
            .map(|s| s.len() as i64)
            .unwrap_or(0);
        check_expected(aggregate_id, expected, current_version)?;

        let mut new_version = current_version;
        let mut stored = Vec::with_capacity(events.len());
        for mut envelope in events {
            new_version += 1;
            envelope.aggregate_version = new_version;

            let recorded_at = inner.next_recorded_at();
            inner.log.push(DeliveredEvent {
                position: LogPosition {
                    recorded_at,
                    event_id: envelope.event_id,
                },
                envelope: envelope.clone(),
            });
            stored.push(envelope);
        }
        let count = stored.len();
        inner.streams.entry(aggregate_id).or_default().extend(stored);

        tracing::debug!(
            aggregate_id = %aggregate_id,
            new_version = new_version,
            event_count = count,
            "Appended events to in-memory store"
        );

        Ok(new_version)
    }

    async fn load(
        &self,
        ctx: &RequestContext,
        aggregate_id: Uuid,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        ctx.check()?;
        let inner = self.inner.read().await;
        Ok(inner.streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn read_log(
        &self,
        ctx: &RequestContext,
        after: Option<LogPosition>,
        limit: usize,
    ) -> Result<Vec<DeliveredEvent>, EventStoreError> {
        ctx.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .log
            .iter()
            .filter(|e| after.map_or(true, |cursor| e.position > cursor))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryEventStore {
    async fn load_checkpoint(
        &self,
        ctx: &RequestContext,
        group: &str,
    ) -> Result<Option<LogPosition>, EventStoreError> {
        ctx.check()?;
        Ok(self.checkpoints.read().await.get(group).copied())
    }

    async fn save_checkpoint(
        &self,
        ctx: &RequestContext,
        group: &str,
        position: LogPosition,
    ) -> Result<(), EventStoreError> {
        ctx.check()?;
        self.checkpoints
            .write()
            .await
            .insert(group.to_string(), position);
        Ok(())
    }
}
