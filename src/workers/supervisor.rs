use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::metrics::Metrics;
use crate::utils::RetryConfig;

use super::health::{ComponentHealth, HealthMonitor, HealthStatus};
use super::subscription_worker::{SubscriptionWorker, WorkerError};

// ============================================================================
// Subscription Supervisor
// ============================================================================
//
// Owns one task per subscription group:
// - `start` refuses a second live worker for the same group
// - a failed run is restarted after a capped exponential backoff
// - `stop` cancels the worker and waits for it to finish
//
// The cursor lives in the checkpoint store, so a restarted worker resumes
// after the last acked event.
//
// ============================================================================

/// What to do when a worker run fails
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SupervisionStrategy {
    /// Restart the worker after a backoff
    Restart,
    /// Leave the worker stopped and report it unhealthy
    Stop,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub strategy: SupervisionStrategy,
    /// Only the delay fields are used; restarts are unbounded.
    pub backoff: RetryConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            strategy: SupervisionStrategy::Restart,
            backoff: RetryConfig {
                max_attempts: u32::MAX,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
        }
    }
}

struct RunningWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SubscriptionSupervisor {
    health: Arc<HealthMonitor>,
    metrics: Option<Arc<Metrics>>,
    config: SupervisorConfig,
    shutdown: CancellationToken,
    workers: Mutex<HashMap<String, RunningWorker>>,
}

impl SubscriptionSupervisor {
    pub fn new(health: Arc<HealthMonitor>) -> Self {
        Self {
            health,
            metrics: None,
            config: SupervisorConfig::default(),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn start(&self, worker: Arc<SubscriptionWorker>) -> Result<(), WorkerError> {
        let group = worker.group().to_string();
        let mut workers = self.workers.lock().await;

        if workers.get(&group).is_some_and(|running| !running.handle.is_finished()) {
            return Err(WorkerError::AlreadyRunning(group));
        }

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(supervise(
            worker,
            cancel.clone(),
            self.health.clone(),
            self.metrics.clone(),
            self.config.clone(),
        ));

        tracing::info!(group = %group, strategy = ?self.config.strategy, "👷 Supervising subscription worker");
        workers.insert(group, RunningWorker { cancel, handle });
        Ok(())
    }

    pub async fn stop(&self, group: &str) -> Result<(), WorkerError> {
        let running = self
            .workers
            .lock()
            .await
            .remove(group)
            .ok_or_else(|| WorkerError::NotRunning(group.to_string()))?;

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            tracing::error!(group = %group, error = %e, "Worker task panicked");
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        self.shutdown.cancel();
        let drained: Vec<(String, RunningWorker)> = self.workers.lock().await.drain().collect();

        for (group, running) in drained {
            if let Err(e) = running.handle.await {
                tracing::error!(group = %group, error = %e, "Worker task panicked");
            }
        }
        tracing::info!("All subscription workers stopped");
    }

    pub async fn is_running(&self, group: &str) -> bool {
        self.workers
            .lock()
            .await
            .get(group)
            .is_some_and(|running| !running.handle.is_finished())
    }
}

pub fn component_name(group: &str) -> String {
    format!("subscription:{group}")
}

async fn publish(health: &HealthMonitor, metrics: Option<&Metrics>, group: &str, status: HealthStatus) {
    if let Some(metrics) = metrics {
        metrics.set_worker_health(group, status.level());
    }
    health.update(ComponentHealth::new(component_name(group), status)).await;
}

async fn supervise(
    worker: Arc<SubscriptionWorker>,
    cancel: CancellationToken,
    health: Arc<HealthMonitor>,
    metrics: Option<Arc<Metrics>>,
    config: SupervisorConfig,
) {
    let group = worker.group().to_string();
    let metrics = metrics.as_deref();
    let ctx = RequestContext::with_cancellation(cancel);
    let mut failures: u32 = 0;

    loop {
        publish(&health, metrics, &group, HealthStatus::Healthy).await;
        let started = Instant::now();

        let error = match worker.run(&ctx).await {
            Ok(()) => break,
            Err(e) => e,
        };

        // a run that outlived the longest backoff starts the count again
        if started.elapsed() > config.backoff.max_delay {
            failures = 0;
        }
        failures = failures.saturating_add(1);

        if config.strategy == SupervisionStrategy::Stop {
            tracing::error!(group = %group, error = %error, "❌ Subscription worker failed, not restarting");
            publish(&health, metrics, &group, HealthStatus::Unhealthy(error.to_string())).await;
            return;
        }

        let delay = config.backoff.delay_for(failures);
        tracing::warn!(
            group = %group,
            error = %error,
            failures,
            delay_ms = delay.as_millis() as u64,
            "⚠️ Subscription worker failed, restarting"
        );
        if let Some(metrics) = metrics {
            metrics.record_worker_restart(&group);
        }
        publish(
            &health,
            metrics,
            &group,
            HealthStatus::Degraded(format!("restarting after: {error}")),
        )
        .await;

        if ctx.run(tokio::time::sleep(delay)).await.is_err() {
            break;
        }
    }

    publish(&health, metrics, &group, HealthStatus::Unhealthy("stopped".to_string())).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{AccountProjection, InMemoryAccountReadModel};
    use crate::event_sourcing::core::EventEnvelope;
    use crate::event_sourcing::store::{
        CheckpointStore, EventStore, ExpectedVersion, InMemoryEventStore, SubscriptionConfig,
    };
    use crate::workers::dead_letter::{DeadLetter, DeadLetterError, DeadLetterSink, InMemoryDeadLetterQueue};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    fn fast_config(strategy: SupervisionStrategy) -> SupervisorConfig {
        SupervisorConfig {
            strategy,
            backoff: RetryConfig {
                max_attempts: u32::MAX,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            },
        }
    }

    /// Fails the first write, then behaves like the in-memory queue.
    #[derive(Default)]
    struct FailsOnce {
        failed: AtomicBool,
        inner: InMemoryDeadLetterQueue,
    }

    #[async_trait]
    impl DeadLetterSink for FailsOnce {
        async fn record(&self, ctx: &RequestContext, letter: DeadLetter) -> Result<(), DeadLetterError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(DeadLetterError::Database("dlq unavailable".to_string()));
            }
            self.inner.record(ctx, letter).await
        }

        async fn list(&self, ctx: &RequestContext, group: &str, limit: usize) -> Result<Vec<DeadLetter>, DeadLetterError> {
            self.inner.list(ctx, group, limit).await
        }
    }

    fn worker(store: Arc<InMemoryEventStore>, sink: Arc<dyn DeadLetterSink>) -> Arc<SubscriptionWorker> {
        Arc::new(
            SubscriptionWorker::new(
                "projections",
                store.clone(),
                store,
                Arc::new(AccountProjection::new(Arc::new(InMemoryAccountReadModel::new()))),
                sink,
            )
            .with_subscription_config(SubscriptionConfig {
                batch_size: 10,
                poll_interval: Duration::from_millis(5),
                ..SubscriptionConfig::default()
            })
            .with_retry(RetryConfig::default().with_max_attempts(1)),
        )
    }

    async fn append_poison(store: &InMemoryEventStore) {
        let id = Uuid::new_v4();
        store
            .append(
                &RequestContext::background(),
                id,
                ExpectedVersion::Any,
                vec![EventEnvelope::new(id, 1, "RegisterAccount", "{oops".to_string())],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_start_for_same_group_is_rejected() {
        let store = Arc::new(InMemoryEventStore::new());
        let health = Arc::new(HealthMonitor::new());
        let supervisor = SubscriptionSupervisor::new(health.clone());

        supervisor
            .start(worker(store.clone(), Arc::new(InMemoryDeadLetterQueue::new())))
            .await
            .unwrap();
        let second = supervisor
            .start(worker(store.clone(), Arc::new(InMemoryDeadLetterQueue::new())))
            .await;
        assert!(matches!(second, Err(WorkerError::AlreadyRunning(g)) if g == "projections"));
        assert!(supervisor.is_running("projections").await);

        supervisor.stop("projections").await.unwrap();
        assert!(!supervisor.is_running("projections").await);
        assert!(matches!(
            supervisor.stop("projections").await,
            Err(WorkerError::NotRunning(_))
        ));

        let status = health.component(&component_name("projections")).await.unwrap().status;
        assert!(status.is_unhealthy());
    }

    #[tokio::test]
    async fn test_failed_worker_is_restarted_and_resumes() {
        let store = Arc::new(InMemoryEventStore::new());
        append_poison(&store).await;

        let health = Arc::new(HealthMonitor::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let sink = Arc::new(FailsOnce::default());
        let supervisor = SubscriptionSupervisor::new(health.clone())
            .with_metrics(metrics.clone())
            .with_config(fast_config(SupervisionStrategy::Restart));

        supervisor.start(worker(store.clone(), sink.clone())).await.unwrap();

        let ctx = RequestContext::background();
        for _ in 0..200 {
            if store.load_checkpoint(&ctx, "projections").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(store.load_checkpoint(&ctx, "projections").await.unwrap().is_some());
        assert_eq!(sink.inner.len().await, 1);
        assert_eq!(
            metrics.worker_restarts.with_label_values(&["projections"]).get(),
            1
        );
        let status = health.component(&component_name("projections")).await.unwrap().status;
        assert!(status.is_healthy());

        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_strategy_reports_unhealthy() {
        let store = Arc::new(InMemoryEventStore::new());
        append_poison(&store).await;

        let health = Arc::new(HealthMonitor::new());
        let supervisor = SubscriptionSupervisor::new(health.clone())
            .with_config(fast_config(SupervisionStrategy::Stop));

        supervisor
            .start(worker(store.clone(), Arc::new(FailsOnce::default())))
            .await
            .unwrap();

        for _ in 0..200 {
            if !supervisor.is_running("projections").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!supervisor.is_running("projections").await);
        let status = health.component(&component_name("projections")).await.unwrap().status;
        assert!(matches!(status, HealthStatus::Unhealthy(reason) if reason.contains("dlq unavailable")));
    }
}
