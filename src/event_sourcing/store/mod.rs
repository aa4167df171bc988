// ============================================================================
// Event Sourcing Store - Persistence Layer
// ============================================================================

pub mod aggregate_store;
pub mod event_store;
pub mod memory;
pub mod scylla_store;
pub mod subscription;

pub use aggregate_store::AggregateStore;
pub use event_store::{CheckpointStore, EventStore, EventStoreError, ExpectedVersion};
pub use memory::InMemoryEventStore;
pub use scylla_store::{ensure_schema, ScyllaCheckpointStore, ScyllaEventStore};
pub use subscription::{PersistentSubscription, SubscriptionConfig};
