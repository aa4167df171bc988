// ============================================================================
// Workers Module
// ============================================================================
//
// Background tasks that keep the read side in step with the event log.
//
// Structure:
// - subscription_worker - log → projection loop with retry and dead-lettering
// - supervisor          - start/stop and restart-with-backoff per group
// - dead_letter         - parked events (Scylla and in-memory)
// - health              - component status served on /health
//
// ============================================================================

pub mod dead_letter;
pub mod health;
pub mod subscription_worker;
pub mod supervisor;

pub use dead_letter::{
    DeadLetter, DeadLetterError, DeadLetterSink, InMemoryDeadLetterQueue, ScyllaDeadLetterQueue,
    DEAD_LETTER_SCHEMA,
};
pub use health::{compute_overall_status, ComponentHealth, HealthMonitor, HealthStatus, SystemHealth};
pub use subscription_worker::{SubscriptionWorker, WorkerError};
pub use supervisor::{component_name, SubscriptionSupervisor, SupervisionStrategy, SupervisorConfig};
