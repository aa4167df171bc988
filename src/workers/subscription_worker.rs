use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::context::RequestContext;
use crate::domain::account::{ProjectionError, ProjectionProcessor};
use crate::error::{ErrorKind, HasErrorKind};
use crate::event_sourcing::core::DeliveredEvent;
use crate::event_sourcing::store::{
    CheckpointStore, EventStore, EventStoreError, PersistentSubscription, SubscriptionConfig,
};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

use super::dead_letter::{DeadLetter, DeadLetterError, DeadLetterSink};

// ============================================================================
// Subscription Worker - log → projection, one event at a time
// ============================================================================
//
// Flow per event:
// 1. Project it, retrying transient failures with exponential backoff
// 2. Success → ack
// 3. Permanent failure or retries exhausted → dead-letter, then ack
// 4. Dead-letter write fails → return the error WITHOUT acking, so the
//    supervisor restarts us and the event is delivered again
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker for group {0} is already running")]
    AlreadyRunning(String),

    #[error("No worker running for group {0}")]
    NotRunning(String),

    #[error("Subscription error: {0}")]
    Subscription(#[from] EventStoreError),

    #[error("Dead letter write failed: {0}")]
    DeadLetter(#[from] DeadLetterError),
}

impl HasErrorKind for WorkerError {
    fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::AlreadyRunning(_) => ErrorKind::Conflict,
            WorkerError::NotRunning(_) => ErrorKind::NotFound,
            WorkerError::Subscription(e) => e.kind(),
            WorkerError::DeadLetter(e) => e.kind(),
        }
    }
}

pub struct SubscriptionWorker {
    group: String,
    event_store: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    projection: Arc<dyn ProjectionProcessor>,
    dead_letters: Arc<dyn DeadLetterSink>,
    subscription: SubscriptionConfig,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl SubscriptionWorker {
    pub fn new(
        group: impl Into<String>,
        event_store: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        projection: Arc<dyn ProjectionProcessor>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            group: group.into(),
            event_store,
            checkpoints,
            projection,
            dead_letters,
            subscription: SubscriptionConfig::default(),
            retry: RetryConfig::default(),
            metrics: None,
        }
    }

    pub fn with_subscription_config(mut self, config: SubscriptionConfig) -> Self {
        self.subscription = config;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Consume the log until `ctx` is cancelled. Cancellation is a clean
    /// exit; any other error means the worker needs a restart.
    pub async fn run(&self, ctx: &RequestContext) -> Result<(), WorkerError> {
        let mut subscription = match PersistentSubscription::open(
            ctx,
            self.group.clone(),
            self.event_store.clone(),
            self.checkpoints.clone(),
            self.subscription.clone(),
        )
        .await
        {
            Ok(subscription) => subscription,
            Err(EventStoreError::Context(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(group = %self.group, "🚀 Subscription worker started");

        loop {
            let delivered = match subscription.next(ctx).await {
                Ok(delivered) => delivered,
                Err(EventStoreError::Context(_)) => break,
                Err(e) => return Err(e.into()),
            };

            if !self.handle(ctx, &delivered).await? {
                break;
            }

            match subscription.ack(ctx, &delivered).await {
                Ok(()) => {}
                Err(EventStoreError::Context(_)) => break,
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(group = %self.group, "🛑 Subscription worker stopped");
        Ok(())
    }

    /// Returns `Ok(true)` when the event may be acked, `Ok(false)` when the
    /// worker was cancelled mid-event.
    async fn handle(&self, ctx: &RequestContext, delivered: &DeliveredEvent) -> Result<bool, WorkerError> {
        let event = &delivered.envelope;
        let projection = &self.projection;
        let metrics = self.metrics.as_deref();
        let attempts = AtomicU32::new(0);
        let tried = &attempts;
        let first_failed_at = Utc::now();
        let started = Instant::now();

        let outcome = retry_on_transient(self.retry.clone(), move |attempt| {
            tried.store(attempt, Ordering::Relaxed);
            if attempt > 1 {
                if let Some(metrics) = metrics {
                    metrics.record_retry_attempt("projection", attempt);
                }
            }
            projection.process_event(ctx, event)
        })
        .await;

        let elapsed = started.elapsed().as_secs_f64();

        let error = match outcome {
            RetryResult::Success(()) => {
                if let Some(metrics) = metrics {
                    metrics.record_projection(&event.event_type, elapsed, None);
                }
                tracing::debug!(
                    group = %self.group,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Event projected"
                );
                return Ok(true);
            }
            RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => e,
        };

        if error.kind() == ErrorKind::Cancelled {
            tracing::debug!(group = %self.group, event_id = %event.event_id, "Projection cancelled");
            return Ok(false);
        }

        if let Some(metrics) = metrics {
            metrics.record_projection(&event.event_type, elapsed, Some(failure_reason(&error)));
        }

        let letter = DeadLetter::from_event(
            &self.group,
            event,
            error.to_string(),
            attempts.load(Ordering::Relaxed),
            first_failed_at,
        );

        match self.dead_letters.record(ctx, letter).await {
            Ok(()) => {}
            Err(DeadLetterError::Context(_)) => return Ok(false),
            Err(e) => {
                tracing::error!(
                    group = %self.group,
                    event_id = %event.event_id,
                    error = %e,
                    "❌ Could not dead-letter event, leaving it unacked"
                );
                return Err(e.into());
            }
        }

        if let Some(metrics) = metrics {
            metrics.record_dead_letter(&event.event_type);
        }
        Ok(true)
    }
}

fn failure_reason(error: &ProjectionError) -> &'static str {
    match error {
        ProjectionError::Decode { .. } => "decode",
        ProjectionError::MissingRow(_) => "missing_row",
        ProjectionError::Conflict(_) => "conflict",
        ProjectionError::ReadModel(_) => "read_model",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{AccountProjection, InMemoryAccountReadModel, ReadModelError};
    use crate::event_sourcing::core::EventEnvelope;
    use crate::event_sourcing::store::{ExpectedVersion, InMemoryEventStore};
    use crate::workers::dead_letter::InMemoryDeadLetterQueue;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    fn fast_config() -> SubscriptionConfig {
        SubscriptionConfig {
            batch_size: 10,
            poll_interval: Duration::from_millis(5),
            ..SubscriptionConfig::default()
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    async fn append(store: &InMemoryEventStore, event_type: &str, data: &str) -> Uuid {
        let id = Uuid::new_v4();
        let event = EventEnvelope::new(id, 1, event_type, data.to_string());
        store
            .append(&RequestContext::background(), id, ExpectedVersion::Any, vec![event])
            .await
            .unwrap();
        id
    }

    /// Records every event it sees; fails transiently for the first
    /// `transient_failures` calls and permanently for ids in `poison`.
    #[derive(Default)]
    struct ScriptedProjection {
        transient_failures: AtomicU32,
        poison: Vec<Uuid>,
        seen: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl ProjectionProcessor for ScriptedProjection {
        async fn process_event(&self, _ctx: &RequestContext, event: &EventEnvelope) -> Result<(), ProjectionError> {
            if self.transient_failures.load(Ordering::SeqCst) > 0 {
                self.transient_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ReadModelError::Database("connection reset".to_string()).into());
            }
            if self.poison.contains(&event.aggregate_id) {
                return Err(ProjectionError::MissingRow(event.aggregate_id));
            }
            self.seen.lock().await.push(event.aggregate_id);
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl DeadLetterSink for BrokenSink {
        async fn record(&self, _ctx: &RequestContext, _letter: DeadLetter) -> Result<(), DeadLetterError> {
            Err(DeadLetterError::Database("dlq unavailable".to_string()))
        }

        async fn list(&self, _ctx: &RequestContext, _group: &str, _limit: usize) -> Result<Vec<DeadLetter>, DeadLetterError> {
            Ok(Vec::new())
        }
    }

    async fn run_until<F>(worker: Arc<SubscriptionWorker>, mut done: F) -> Result<(), WorkerError>
    where
        F: FnMut() -> futures_util::future::BoxFuture<'static, bool>,
    {
        let ctx = RequestContext::background();
        let runner = {
            let ctx = ctx.clone();
            tokio::spawn(async move { worker.run(&ctx).await })
        };

        for _ in 0..200 {
            if done().await || runner.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        ctx.cancel();
        runner.await.unwrap()
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_then_acked() {
        let store = Arc::new(InMemoryEventStore::new());
        let id = append(&store, "RegisterAccount", "{}").await;

        let projection = Arc::new(ScriptedProjection {
            transient_failures: AtomicU32::new(2),
            ..Default::default()
        });
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let worker = Arc::new(
            SubscriptionWorker::new("g", store.clone(), store.clone(), projection.clone(), dlq.clone())
                .with_subscription_config(fast_config())
                .with_retry(fast_retry(5)),
        );

        let watched = store.clone();
        run_until(worker, move || {
            let watched = watched.clone();
            Box::pin(async move {
                watched
                    .load_checkpoint(&RequestContext::background(), "g")
                    .await
                    .is_ok_and(|cp| cp.is_some())
            })
        })
        .await
        .unwrap();

        assert_eq!(*projection.seen.lock().await, vec![id]);
        assert!(dlq.is_empty().await);
        assert!(store
            .load_checkpoint(&RequestContext::background(), "g")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_poison_event_is_dead_lettered_and_stream_moves_on() {
        let store = Arc::new(InMemoryEventStore::new());
        let bad = append(&store, "RegisterAccount", "{}").await;
        let good = append(&store, "RegisterAccount", "{}").await;

        let projection = Arc::new(ScriptedProjection {
            poison: vec![bad],
            ..Default::default()
        });
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let worker = Arc::new(
            SubscriptionWorker::new("g", store.clone(), store.clone(), projection.clone(), dlq.clone())
                .with_subscription_config(fast_config())
                .with_retry(fast_retry(3)),
        );

        let watched = projection.clone();
        run_until(worker, move || {
            let watched = watched.clone();
            Box::pin(async move { !watched.seen.lock().await.is_empty() })
        })
        .await
        .unwrap();

        assert_eq!(*projection.seen.lock().await, vec![good]);
        let letters = dlq.list(&RequestContext::background(), "g", 10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].aggregate_id, bad);
        // permanent errors are not retried
        assert_eq!(letters[0].failure_count, 1);
    }

    #[tokio::test]
    async fn test_undecodable_event_reaches_dead_letter_queue() {
        let store = Arc::new(InMemoryEventStore::new());
        append(&store, "RegisterAccount", "{not json").await;

        let read_model = Arc::new(InMemoryAccountReadModel::new());
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let worker = Arc::new(
            SubscriptionWorker::new(
                "g",
                store.clone(),
                store.clone(),
                Arc::new(AccountProjection::new(read_model.clone())),
                dlq.clone(),
            )
            .with_subscription_config(fast_config())
            .with_retry(fast_retry(3))
            .with_metrics(metrics.clone()),
        );

        let watched = dlq.clone();
        run_until(worker, move || {
            let watched = watched.clone();
            Box::pin(async move { !watched.is_empty().await })
        })
        .await
        .unwrap();

        assert_eq!(dlq.len().await, 1);
        assert!(read_model.is_empty().await);
        assert_eq!(metrics.dead_letters_total.get(), 1);
    }

    #[tokio::test]
    async fn test_failed_dead_letter_write_stops_worker_without_ack() {
        let store = Arc::new(InMemoryEventStore::new());
        let bad = append(&store, "RegisterAccount", "{}").await;

        let projection = Arc::new(ScriptedProjection {
            poison: vec![bad],
            ..Default::default()
        });
        let worker = Arc::new(
            SubscriptionWorker::new("g", store.clone(), store.clone(), projection, Arc::new(BrokenSink))
                .with_subscription_config(fast_config())
                .with_retry(fast_retry(2)),
        );

        let result = run_until(worker, || Box::pin(async { false })).await;

        assert!(matches!(result, Err(WorkerError::DeadLetter(_))));
        assert!(store
            .load_checkpoint(&RequestContext::background(), "g")
            .await
            .unwrap()
            .is_none());
    }
}
