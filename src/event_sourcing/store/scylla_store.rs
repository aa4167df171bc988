use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use scylla::client::session::Session;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::event_sourcing::core::{DeliveredEvent, EventEnvelope, LogPosition};

use super::event_store::{
    check_expected, validate_append, CheckpointStore, EventStore, EventStoreError, ExpectedVersion,
};

// ============================================================================
// ScyllaDB Event Store
// ============================================================================
//
// Tables:
// - account_events:           one partition per aggregate, clustered by version
// - aggregate_sequence:       current stream length per aggregate
// - account_event_log:        global log, single partition, clustered by
//                             (recorded_at, event_id); feeds subscriptions
// - subscription_checkpoints: last acknowledged log position per group
//
// Every append writes the stream rows, the log rows and the new sequence in
// one logged batch. `recorded_at` is stamped before the batch commits, so
// log rows can appear out of order; subscribers re-read a trailing window.
//
// ============================================================================

const LOG_PARTITION: i32 = 0;

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS account_events (
        aggregate_id uuid,
        aggregate_version bigint,
        event_id uuid,
        event_type text,
        event_data text,
        metadata text,
        timestamp timestamp,
        PRIMARY KEY (aggregate_id, aggregate_version)
    ) WITH CLUSTERING ORDER BY (aggregate_version ASC)",
    "CREATE TABLE IF NOT EXISTS aggregate_sequence (
        aggregate_id uuid PRIMARY KEY,
        current_sequence bigint,
        updated_at timestamp
    )",
    "CREATE TABLE IF NOT EXISTS account_event_log (
        log_partition int,
        recorded_at timestamp,
        event_id uuid,
        aggregate_id uuid,
        aggregate_version bigint,
        event_type text,
        event_data text,
        metadata text,
        timestamp timestamp,
        PRIMARY KEY (log_partition, recorded_at, event_id)
    ) WITH CLUSTERING ORDER BY (recorded_at ASC, event_id ASC)",
    "CREATE TABLE IF NOT EXISTS subscription_checkpoints (
        group_name text PRIMARY KEY,
        recorded_at timestamp,
        event_id uuid,
        updated_at timestamp
    )",
];

/// Create the tables above in the session's current keyspace.
pub async fn ensure_schema(session: &Session) -> Result<(), EventStoreError> {
    for statement in SCHEMA {
        session
            .query_unpaged(*statement, &[])
            .await
            .map_err(EventStoreError::database)?;
    }
    tracing::info!(tables = SCHEMA.len(), "📐 Event store schema ready");
    Ok(())
}

type LogRow = (
    DateTime<Utc>,
    Uuid,
    Uuid,
    i64,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
);

pub struct ScyllaEventStore {
    session: Arc<Session>,
}

impl ScyllaEventStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Get current stream length of an aggregate
    pub async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT current_sequence FROM aggregate_sequence WHERE aggregate_id = ?",
                (aggregate_id,),
            )
            .await
            .map_err(EventStoreError::database)?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(0), // No rows = new aggregate
        };

        match rows_result.maybe_first_row::<(i64,)>() {
            Ok(Some((version,))) => Ok(version),
            Ok(None) => Ok(0),
            Err(e) => Err(EventStoreError::database(e)),
        }
    }

    async fn append_inner(
        &self,
        aggregate_id: Uuid,
        expected: ExpectedVersion,
        events: Vec<EventEnvelope>,
    ) -> Result<i64, EventStoreError> {
        let current_version = self.current_version(aggregate_id).await?;
        check_expected(aggregate_id, expected, current_version)?;

        let mut batch = scylla::statement::batch::Batch::default();
        let mut values: Vec<Box<dyn scylla::serialize::row::SerializeRow + Send + Sync>> = vec![];

        // Scylla stores millisecond timestamps; truncate so a cursor read
        // back from the log compares equal to what was written. Events of
        // one batch are spaced 1ms apart to keep their log order.
        let batch_started = Utc::now()
            .duration_trunc(TimeDelta::milliseconds(1))
            .map_err(EventStoreError::database)?;

        let mut new_version = current_version;

        for (offset, envelope) in events.iter().enumerate() {
            new_version += 1;
            let recorded_at = batch_started + TimeDelta::milliseconds(offset as i64);

            batch.append_statement(
                "INSERT INTO account_events (
                    aggregate_id, aggregate_version, event_id, event_type,
                    event_data, metadata, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            );
            values.push(Box::new((
                aggregate_id,
                new_version,
                envelope.event_id,
                envelope.event_type.clone(),
                envelope.data.clone(),
                envelope.metadata.clone(),
                envelope.timestamp,
            )));

            batch.append_statement(
                "INSERT INTO account_event_log (
                    log_partition, recorded_at, event_id, aggregate_id,
                    aggregate_version, event_type, event_data, metadata, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            );
            values.push(Box::new((
                LOG_PARTITION,
                recorded_at,
                envelope.event_id,
                aggregate_id,
                new_version,
                envelope.event_type.clone(),
                envelope.data.clone(),
                envelope.metadata.clone(),
                envelope.timestamp,
            )));
        }

        batch.append_statement(
            "INSERT INTO aggregate_sequence (aggregate_id, current_sequence, updated_at) VALUES (?, ?, ?)",
        );
        values.push(Box::new((aggregate_id, new_version, Utc::now())));

        self.session
            .batch(&batch, values)
            .await
            .map_err(EventStoreError::database)?;

        tracing::info!(
            aggregate_id = %aggregate_id,
            new_version = new_version,
            event_count = events.len(),
            "✅ Appended events to event store"
        );

        Ok(new_version)
    }

    async fn load_inner(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT aggregate_version, event_id, event_type, event_data, metadata, timestamp
                 FROM account_events
                 WHERE aggregate_id = ?
                 ORDER BY aggregate_version ASC",
                (aggregate_id,),
            )
            .await
            .map_err(EventStoreError::database)?;

        let mut events = Vec::new();

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(events),
        };

        let rows = rows_result
            .rows::<(i64, Uuid, String, String, Option<String>, DateTime<Utc>)>()
            .map_err(EventStoreError::database)?;

        for row in rows {
            let (aggregate_version, event_id, event_type, data, metadata, timestamp) =
                row.map_err(EventStoreError::database)?;

            events.push(EventEnvelope {
                event_id,
                event_type,
                aggregate_id,
                aggregate_version,
                timestamp,
                data,
                metadata,
            });
        }

        tracing::debug!(aggregate_id = %aggregate_id, count = events.len(), "Loaded events");
        Ok(events)
    }

    async fn read_log_inner(
        &self,
        after: Option<LogPosition>,
        limit: usize,
    ) -> Result<Vec<DeliveredEvent>, EventStoreError> {
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);

        let result = match after {
            Some(position) => {
                self.session
                    .query_unpaged(
                        "SELECT recorded_at, event_id, aggregate_id, aggregate_version,
                                event_type, event_data, metadata, timestamp
                         FROM account_event_log
                         WHERE log_partition = ? AND (recorded_at, event_id) > (?, ?)
                         LIMIT ?",
                        (LOG_PARTITION, position.recorded_at, position.event_id, limit),
                    )
                    .await
            }
            None => {
                self.session
                    .query_unpaged(
                        "SELECT recorded_at, event_id, aggregate_id, aggregate_version,
                                event_type, event_data, metadata, timestamp
                         FROM account_event_log
                         WHERE log_partition = ?
                         LIMIT ?",
                        (LOG_PARTITION, limit),
                    )
                    .await
            }
        }
        .map_err(EventStoreError::database)?;

        let mut delivered = Vec::new();

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(delivered),
        };

        for row in rows_result.rows::<LogRow>().map_err(EventStoreError::database)? {
            let (recorded_at, event_id, aggregate_id, aggregate_version, event_type, data, metadata, timestamp) =
                row.map_err(EventStoreError::database)?;

            delivered.push(DeliveredEvent {
                position: LogPosition { recorded_at, event_id },
                envelope: EventEnvelope {
                    event_id,
                    event_type,
                    aggregate_id,
                    aggregate_version,
                    timestamp,
                    data,
                    metadata,
                },
            });
        }

        Ok(delivered)
    }
}

#[async_trait]
impl EventStore for ScyllaEventStore {
    async fn append(
        &self,
        ctx: &RequestContext,
        aggregate_id: Uuid,
        expected: ExpectedVersion,
        events: Vec<EventEnvelope>,
    ) -> Result<i64, EventStoreError> {
        validate_append(aggregate_id, &events)?;
        ctx.run(self.append_inner(aggregate_id, expected, events)).await?
    }

    async fn load(
        &self,
        ctx: &RequestContext,
        aggregate_id: Uuid,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        ctx.run(self.load_inner(aggregate_id)).await?
    }

    async fn read_log(
        &self,
        ctx: &RequestContext,
        after: Option<LogPosition>,
        limit: usize,
    ) -> Result<Vec<DeliveredEvent>, EventStoreError> {
        ctx.run(self.read_log_inner(after, limit)).await?
    }
}

// ============================================================================
// Checkpoints
// ============================================================================

pub struct ScyllaCheckpointStore {
    session: Arc<Session>,
}

impl ScyllaCheckpointStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl CheckpointStore for ScyllaCheckpointStore {
    async fn load_checkpoint(
        &self,
        ctx: &RequestContext,
        group: &str,
    ) -> Result<Option<LogPosition>, EventStoreError> {
        let result = ctx
            .run(self.session.query_unpaged(
                "SELECT recorded_at, event_id FROM subscription_checkpoints WHERE group_name = ?",
                (group,),
            ))
            .await?
            .map_err(EventStoreError::database)?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(None),
        };

        match rows_result.maybe_first_row::<(DateTime<Utc>, Uuid)>() {
            Ok(Some((recorded_at, event_id))) => {
                tracing::info!(
                    group = %group,
                    recorded_at = %recorded_at,
                    event_id = %event_id,
                    "Loaded subscription checkpoint"
                );
                Ok(Some(LogPosition { recorded_at, event_id }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(EventStoreError::database(e)),
        }
    }

    async fn save_checkpoint(
        &self,
        ctx: &RequestContext,
        group: &str,
        position: LogPosition,
    ) -> Result<(), EventStoreError> {
        ctx.run(self.session.query_unpaged(
            "INSERT INTO subscription_checkpoints (group_name, recorded_at, event_id, updated_at) VALUES (?, ?, ?, ?)",
            (group, position.recorded_at, position.event_id, Utc::now()),
        ))
        .await?
        .map_err(EventStoreError::database)?;

        tracing::debug!(
            group = %group,
            event_id = %position.event_id,
            "Saved subscription checkpoint"
        );
        Ok(())
    }
}
