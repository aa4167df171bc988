// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Account commands and appended events
// - Projection throughput, latency and failures
// - Dead letters and worker restarts
// - Token issuance, verification and revocation
// - Circuit breaker state of the revocation cache
//
// Scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Command side
    pub commands_handled: IntCounterVec,
    pub events_appended: IntCounterVec,

    // Projection
    pub projection_processed: IntCounterVec,
    pub projection_failed: IntCounterVec,
    pub projection_duration: HistogramVec,

    // Retry
    pub retry_attempts_total: IntCounterVec,

    // Dead letters / workers
    pub dead_letters_total: IntCounter,
    pub dead_letters_by_event_type: IntCounterVec,
    pub worker_restarts: IntCounterVec,
    pub worker_health_status: IntGaugeVec,

    // Tokens
    pub tokens_issued: IntCounterVec,
    pub tokens_verified: IntCounterVec,
    pub tokens_revoked: IntCounter,
    pub revocation_mirror_failures: IntCounter,

    // Circuit breaker
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let commands_handled = IntCounterVec::new(
            Opts::new("account_commands_total", "Account commands handled"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands_handled.clone()))?;

        let events_appended = IntCounterVec::new(
            Opts::new("account_events_appended_total", "Events appended to account streams"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let projection_processed = IntCounterVec::new(
            Opts::new("projection_events_processed_total", "Events applied to the read model"),
            &["event_type"],
        )?;
        registry.register(Box::new(projection_processed.clone()))?;

        let projection_failed = IntCounterVec::new(
            Opts::new("projection_events_failed_total", "Events the projection failed to apply"),
            &["event_type", "reason"],
        )?;
        registry.register(Box::new(projection_failed.clone()))?;

        let projection_duration = HistogramVec::new(
            HistogramOpts::new("projection_duration_seconds", "Projection latency per event")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(projection_duration.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let dead_letters_total = IntCounter::new(
            "dead_letters_total",
            "Events parked in the dead letter queue",
        )?;
        registry.register(Box::new(dead_letters_total.clone()))?;

        let dead_letters_by_event_type = IntCounterVec::new(
            Opts::new("dead_letters_by_event_type", "Dead letters by event type"),
            &["event_type"],
        )?;
        registry.register(Box::new(dead_letters_by_event_type.clone()))?;

        let worker_restarts = IntCounterVec::new(
            Opts::new("subscription_worker_restarts_total", "Supervisor restarts of a worker"),
            &["group"],
        )?;
        registry.register(Box::new(worker_restarts.clone()))?;

        let worker_health_status = IntGaugeVec::new(
            Opts::new(
                "subscription_worker_health",
                "Worker health (0=Unhealthy, 1=Degraded, 2=Healthy)",
            ),
            &["group"],
        )?;
        registry.register(Box::new(worker_health_status.clone()))?;

        let tokens_issued = IntCounterVec::new(
            Opts::new("tokens_issued_total", "Signed tokens issued"),
            &["kind"],
        )?;
        registry.register(Box::new(tokens_issued.clone()))?;

        let tokens_verified = IntCounterVec::new(
            Opts::new("tokens_verified_total", "Token verifications"),
            &["outcome"],
        )?;
        registry.register(Box::new(tokens_verified.clone()))?;

        let tokens_revoked = IntCounter::new("tokens_revoked_total", "Token records deleted")?;
        registry.register(Box::new(tokens_revoked.clone()))?;

        let revocation_mirror_failures = IntCounter::new(
            "revocation_mirror_failures_total",
            "Revoked tokens that could not be mirrored into the cache",
        )?;
        registry.register(Box::new(revocation_mirror_failures.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        Ok(Self {
            registry,
            commands_handled,
            events_appended,
            projection_processed,
            projection_failed,
            projection_duration,
            retry_attempts_total,
            dead_letters_total,
            dead_letters_by_event_type,
            worker_restarts,
            worker_health_status,
            tokens_issued,
            tokens_verified,
            tokens_revoked,
            revocation_mirror_failures,
            circuit_breaker_state,
            circuit_breaker_transitions,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_command(&self, command: &str, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.commands_handled.with_label_values(&[command, outcome]).inc();
    }

    pub fn record_event_appended(&self, event_type: &str) {
        self.events_appended.with_label_values(&[event_type]).inc();
    }

    /// Helper to record one projection attempt
    pub fn record_projection(&self, event_type: &str, duration_secs: f64, failure: Option<&str>) {
        match failure {
            None => self.projection_processed.with_label_values(&[event_type]).inc(),
            Some(reason) => self
                .projection_failed
                .with_label_values(&[event_type, reason])
                .inc(),
        }
        self.projection_duration
            .with_label_values(&[event_type])
            .observe(duration_secs);
    }

    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total
            .with_label_values(&[operation, &attempt.to_string()])
            .inc();
    }

    pub fn record_dead_letter(&self, event_type: &str) {
        self.dead_letters_total.inc();
        self.dead_letters_by_event_type.with_label_values(&[event_type]).inc();
    }

    pub fn record_worker_restart(&self, group: &str) {
        self.worker_restarts.with_label_values(&[group]).inc();
    }

    pub fn set_worker_health(&self, group: &str, level: i64) {
        self.worker_health_status.with_label_values(&[group]).set(level);
    }

    pub fn record_token_issued(&self, kind: &str) {
        self.tokens_issued.with_label_values(&[kind]).inc();
    }

    pub fn record_token_verified(&self, outcome: &str) {
        self.tokens_verified.with_label_values(&[outcome]).inc();
    }

    pub fn record_revocation(&self, revoked: usize, mirror_failures: usize) {
        self.tokens_revoked.inc_by(revoked as u64);
        self.revocation_mirror_failures.inc_by(mirror_failures as u64);
    }

    pub fn update_circuit_breaker_state(&self, state: u8) {
        self.circuit_breaker_state.set(state as i64);
    }

    pub fn record_circuit_breaker_transition(&self, from_state: &str, to_state: &str) {
        self.circuit_breaker_transitions
            .with_label_values(&[from_state, to_state])
            .inc();
    }
}
