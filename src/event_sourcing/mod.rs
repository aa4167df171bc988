// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Envelope, aggregate capability and the event log. Account-specific code
// lives in src/domain/.
//
// ============================================================================

pub mod core;
pub mod store;

pub use self::core::*;
pub use self::store::*;
