use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::context::{ContextError, RequestContext};
use crate::error::{ErrorKind, HasErrorKind};
use crate::event_sourcing::core::EventEnvelope;

// ============================================================================
// Dead Letter Queue
// ============================================================================
//
// Events the projection could not apply, parked for manual intervention so
// the subscription can move past them.
//
// ============================================================================

pub const DEAD_LETTER_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS dead_letter_queue (
    consumer_group text,
    event_id uuid,
    aggregate_id uuid,
    event_type text,
    payload text,
    error_message text,
    failure_count int,
    first_failed_at timestamp,
    last_failed_at timestamp,
    PRIMARY KEY (consumer_group, event_id)
)";

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub error_message: String,
    pub failure_count: i32,
    pub first_failed_at: DateTime<Utc>,
    pub group: String,
}

impl DeadLetter {
    pub fn from_event(
        group: &str,
        event: &EventEnvelope,
        error_message: impl Into<String>,
        failure_count: u32,
        first_failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event.event_id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type.clone(),
            payload: event.data.clone(),
            error_message: error_message.into(),
            failure_count: i32::try_from(failure_count).unwrap_or(i32::MAX),
            first_failed_at,
            group: group.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("Dead letter store error: {0}")]
    Database(String),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl HasErrorKind for DeadLetterError {
    fn kind(&self) -> ErrorKind {
        match self {
            DeadLetterError::Database(_) => ErrorKind::Infrastructure,
            DeadLetterError::Context(_) => ErrorKind::Cancelled,
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, ctx: &RequestContext, letter: DeadLetter) -> Result<(), DeadLetterError>;

    async fn list(&self, ctx: &RequestContext, group: &str, limit: usize) -> Result<Vec<DeadLetter>, DeadLetterError>;
}

pub struct ScyllaDeadLetterQueue {
    session: Arc<Session>,
}

impl ScyllaDeadLetterQueue {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn ensure_schema(session: &Session) -> Result<(), DeadLetterError> {
        session
            .query_unpaged(DEAD_LETTER_SCHEMA, &[])
            .await
            .map_err(|e| DeadLetterError::Database(e.to_string()))?;
        Ok(())
    }
}

type DeadLetterRow = (Uuid, Uuid, String, String, String, i32, DateTime<Utc>);

#[async_trait]
impl DeadLetterSink for ScyllaDeadLetterQueue {
    async fn record(&self, ctx: &RequestContext, letter: DeadLetter) -> Result<(), DeadLetterError> {
        tracing::error!(
            event_id = %letter.event_id,
            event_type = %letter.event_type,
            aggregate_id = %letter.aggregate_id,
            error = %letter.error_message,
            failure_count = letter.failure_count,
            "💀 Adding event to Dead Letter Queue"
        );

        let now = Utc::now();
        ctx.run(self.session.query_unpaged(
            "INSERT INTO dead_letter_queue (
                consumer_group, event_id, aggregate_id, event_type, payload,
                error_message, failure_count, first_failed_at, last_failed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &letter.group,
                letter.event_id,
                letter.aggregate_id,
                &letter.event_type,
                &letter.payload,
                &letter.error_message,
                letter.failure_count,
                letter.first_failed_at,
                now,
            ),
        ))
        .await?
        .map_err(|e| DeadLetterError::Database(e.to_string()))?;

        Ok(())
    }

    async fn list(&self, ctx: &RequestContext, group: &str, limit: usize) -> Result<Vec<DeadLetter>, DeadLetterError> {
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let result = ctx
            .run(self.session.query_unpaged(
                "SELECT event_id, aggregate_id, event_type, payload, error_message,
                        failure_count, first_failed_at
                 FROM dead_letter_queue WHERE consumer_group = ? LIMIT ?",
                (group, limit),
            ))
            .await?
            .map_err(|e| DeadLetterError::Database(e.to_string()))?;

        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };

        let mut letters = Vec::new();
        for row in rows
            .rows::<DeadLetterRow>()
            .map_err(|e| DeadLetterError::Database(e.to_string()))?
        {
            let (event_id, aggregate_id, event_type, payload, error_message, failure_count, first_failed_at) =
                row.map_err(|e| DeadLetterError::Database(e.to_string()))?;
            letters.push(DeadLetter {
                event_id,
                aggregate_id,
                event_type,
                payload,
                error_message,
                failure_count,
                first_failed_at,
                group: group.to_string(),
            });
        }
        Ok(letters)
    }
}

#[derive(Default)]
pub struct InMemoryDeadLetterQueue {
    letters: RwLock<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.letters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterQueue {
    async fn record(&self, ctx: &RequestContext, letter: DeadLetter) -> Result<(), DeadLetterError> {
        ctx.check()?;
        tracing::error!(
            event_id = %letter.event_id,
            event_type = %letter.event_type,
            error = %letter.error_message,
            "💀 Adding event to Dead Letter Queue"
        );
        let mut letters = self.letters.write().await;
        letters.retain(|l| !(l.group == letter.group && l.event_id == letter.event_id));
        letters.push(letter);
        Ok(())
    }

    async fn list(&self, ctx: &RequestContext, group: &str, limit: usize) -> Result<Vec<DeadLetter>, DeadLetterError> {
        ctx.check()?;
        Ok(self
            .letters
            .read()
            .await
            .iter()
            .filter(|l| l.group == group)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(group: &str, event: &EventEnvelope) -> DeadLetter {
        DeadLetter::from_event(group, event, "boom", 3, Utc::now())
    }

    #[tokio::test]
    async fn test_record_and_list_by_group() {
        let queue = InMemoryDeadLetterQueue::new();
        let ctx = RequestContext::background();
        let event = EventEnvelope::new(Uuid::new_v4(), 1, "RegisterAccount", "{".to_string());

        queue.record(&ctx, letter("a", &event)).await.unwrap();
        queue
            .record(&ctx, letter("b", &EventEnvelope::new(Uuid::new_v4(), 1, "X", "{}".to_string())))
            .await
            .unwrap();

        let listed = queue.list(&ctx, "a", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_id, event.event_id);
        assert_eq!(listed[0].payload, "{");
        assert_eq!(listed[0].failure_count, 3);
    }

    #[tokio::test]
    async fn test_redelivered_letter_replaces_previous() {
        let queue = InMemoryDeadLetterQueue::new();
        let ctx = RequestContext::background();
        let event = EventEnvelope::new(Uuid::new_v4(), 1, "RegisterAccount", "{".to_string());

        queue.record(&ctx, letter("a", &event)).await.unwrap();
        queue.record(&ctx, letter("a", &event)).await.unwrap();

        assert_eq!(queue.len().await, 1);
    }
}
