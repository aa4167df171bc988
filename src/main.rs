use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sso_core::config::AppConfig;
use sso_core::domain::account::{
    ensure_read_model_schema, AccountCommandHandlers, AccountProjection, AccountReadModel, HandlerDeps,
    ScyllaAccountReadModel, ScyllaEmailRegistry,
};
use sso_core::event_sourcing::{
    ensure_schema, AggregateStore, ScyllaCheckpointStore, ScyllaEventStore, SubscriptionConfig,
};
use sso_core::metrics::{self, Metrics};
use sso_core::services::{AuthConfig, AuthService, LoggingMailSender, RedisOtpRepository};
use sso_core::token::{self, RedisRevocationCache, RedisTokenRepository, SigningKeys, TokenService};
use sso_core::utils::{CircuitBreaker, CircuitBreakerConfig, RetryConfig};
use sso_core::workers::{HealthMonitor, ScyllaDeadLetterQueue, SubscriptionSupervisor, SubscriptionWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sso_core=debug"))
        )
        .init();

    tracing::info!("🚀 Starting account identity core");

    let config = AppConfig::from_env()?;

    // === 1. ScyllaDB session and schema ===
    tracing::info!(nodes = ?config.scylla_nodes, "Connecting to ScyllaDB...");
    let session: Session = SessionBuilder::new()
        .known_nodes(&config.scylla_nodes)
        .build()
        .await?;

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                config.scylla_keyspace
            ),
            &[],
        )
        .await?;
    session.use_keyspace(&config.scylla_keyspace, false).await?;

    ensure_schema(&session).await?;
    ensure_read_model_schema(&session).await?;
    ScyllaEmailRegistry::ensure_schema(&session).await?;
    ScyllaDeadLetterQueue::ensure_schema(&session).await?;

    let session = Arc::new(session);

    // === 2. Prometheus metrics and health ===
    let metrics = Arc::new(Metrics::new()?);
    let health = Arc::new(HealthMonitor::new());
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_health = health.clone();
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Metrics runtime error: {}", e);
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_health, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 3. Redis token store and revocation cache ===
    let redis = token::connect(&config.redis_url, RetryConfig::default()).await?;

    let breaker_metrics = metrics.clone();
    let breaker = CircuitBreaker::new("revocation-cache", CircuitBreakerConfig::default()).with_transition_hook(
        move |from, to| {
            breaker_metrics.update_circuit_breaker_state(to.as_gauge());
            breaker_metrics.record_circuit_breaker_transition(from.as_str(), to.as_str());
        },
    );

    let keys = SigningKeys::from_files(&config.private_key_path, &config.public_key_path)?;
    let tokens = Arc::new(
        TokenService::new(
            keys,
            Arc::new(RedisTokenRepository::new(redis.clone()).with_subject_ttl(config.refresh_token_ttl)),
            Arc::new(RedisRevocationCache::new(redis.clone(), breaker)),
            config.token_config(),
        )
        .with_metrics(metrics.clone()),
    );

    // === 4. Command side ===
    let event_store = Arc::new(ScyllaEventStore::new(session.clone()));
    let read_model: Arc<dyn AccountReadModel> = Arc::new(ScyllaAccountReadModel::new(session.clone()));

    let deps = HandlerDeps::new(
        AggregateStore::new(event_store.clone()),
        read_model.clone(),
        Arc::new(ScyllaEmailRegistry::new(session.clone())),
    )
    .with_metrics(metrics.clone());
    let commands = Arc::new(AccountCommandHandlers::new(deps));

    let auth = AuthService::new(
        commands,
        read_model.clone(),
        tokens,
        Arc::new(RedisOtpRepository::new(redis)),
        Arc::new(LoggingMailSender),
        AuthConfig {
            bcrypt_cost: config.bcrypt_cost,
            otp_length: config.otp_length,
            otp_ttl: config.otp_ttl,
            otp_max_attempts: config.otp_max_attempts,
        },
    );

    // === 5. Projection worker under supervision ===
    let worker = SubscriptionWorker::new(
        config.projections_group.clone(),
        event_store,
        Arc::new(ScyllaCheckpointStore::new(session.clone())),
        Arc::new(AccountProjection::new(read_model)),
        Arc::new(ScyllaDeadLetterQueue::new(session.clone())),
    )
    .with_subscription_config(SubscriptionConfig {
        batch_size: config.subscription_batch_size,
        poll_interval: config.subscription_poll_interval,
        lookback: config.subscription_lookback,
    })
    .with_retry(RetryConfig::default().with_max_attempts(config.projection_max_attempts))
    .with_metrics(metrics.clone());

    let supervisor = SubscriptionSupervisor::new(health.clone()).with_metrics(metrics.clone());
    supervisor.start(Arc::new(worker)).await?;

    tracing::info!(group = %config.projections_group, "✅ Account core ready, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    supervisor.stop_all().await;
    drop(auth);

    tracing::info!("👋 Stopped");
    Ok(())
}
