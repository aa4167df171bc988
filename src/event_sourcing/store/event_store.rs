use async_trait::async_trait;
use uuid::Uuid;

use crate::context::{ContextError, RequestContext};
use crate::error::{ErrorKind, HasErrorKind};
use crate::event_sourcing::core::{DeliveredEvent, EventEnvelope, LogPosition};
use crate::utils::IsTransient;

// ============================================================================
// Event Store - Append-only Log of Account Events
// ============================================================================
//
// Responsibilities:
// 1. Append events to an aggregate's stream, one atomic write per call
// 2. Load a stream forward from its start
// 3. Serve the global log, in recorded order, to subscriptions
//
// Backends live in `scylla.rs` and `memory.rs`.
//
// ============================================================================

/// Stream length the caller believes the aggregate has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append without checking the stream length.
    Any,
    /// Reject unless the stream currently holds exactly this many events.
    Exact(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("Concurrency conflict on {aggregate_id}: expected version {expected}, but current is {actual}")]
    Concurrency {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Cannot append empty event list")]
    EmptyAppend,

    #[error("Event belongs to aggregate {found}, not {expected}")]
    ForeignEvent { expected: Uuid, found: Uuid },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl EventStoreError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        EventStoreError::Database(err.to_string())
    }
}

impl HasErrorKind for EventStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            EventStoreError::Concurrency { .. } => ErrorKind::Conflict,
            EventStoreError::EmptyAppend | EventStoreError::ForeignEvent { .. } => {
                ErrorKind::Validation
            }
            EventStoreError::Serialization(_) | EventStoreError::Database(_) => {
                ErrorKind::Infrastructure
            }
            EventStoreError::Context(_) => ErrorKind::Cancelled,
        }
    }
}

impl IsTransient for EventStoreError {
    fn is_transient(&self) -> bool {
        matches!(self, EventStoreError::Database(_))
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `events` to the stream of `aggregate_id` in one atomic write.
    /// Versions are assigned by the store, continuing from the current
    /// stream length. Returns the stream length after the append.
    async fn append(
        &self,
        ctx: &RequestContext,
        aggregate_id: Uuid,
        expected: ExpectedVersion,
        events: Vec<EventEnvelope>,
    ) -> Result<i64, EventStoreError>;

    /// Full stream in version order. An unknown id yields an empty Vec.
    async fn load(
        &self,
        ctx: &RequestContext,
        aggregate_id: Uuid,
    ) -> Result<Vec<EventEnvelope>, EventStoreError>;

    /// Up to `limit` events of the global log strictly after `after`.
    async fn read_log(
        &self,
        ctx: &RequestContext,
        after: Option<LogPosition>,
        limit: usize,
    ) -> Result<Vec<DeliveredEvent>, EventStoreError>;
}

/// Durable cursor per subscription group.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load_checkpoint(
        &self,
        ctx: &RequestContext,
        group: &str,
    ) -> Result<Option<LogPosition>, EventStoreError>;

    async fn save_checkpoint(
        &self,
        ctx: &RequestContext,
        group: &str,
        position: LogPosition,
    ) -> Result<(), EventStoreError>;
}

/// Shared precondition checks for every backend.
pub(crate) fn validate_append(
    aggregate_id: Uuid,
    events: &[EventEnvelope],
) -> Result<(), EventStoreError> {
    if events.is_empty() {
        return Err(EventStoreError::EmptyAppend);
    }
    if let Some(foreign) = events.iter().find(|e| e.aggregate_id != aggregate_id) {
        return Err(EventStoreError::ForeignEvent {
            expected: aggregate_id,
            found: foreign.aggregate_id,
        });
    }
    Ok(())
}

pub(crate) fn check_expected(
    aggregate_id: Uuid,
    expected: ExpectedVersion,
    current: i64,
) -> Result<(), EventStoreError> {
    match expected {
        ExpectedVersion::Exact(v) if v != current => Err(EventStoreError::Concurrency {
            aggregate_id,
            expected: v,
            actual: current,
        }),
        _ => Ok(()),
    }
}
