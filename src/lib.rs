// ============================================================================
// sso_core - account identity core
// ============================================================================
//
// Event-sourced Account aggregate with a projected read model, RS256
// access/refresh tokens backed by Redis, and the supervised worker that
// keeps the read side in step with the log.
//
// ============================================================================

pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod event_sourcing;
pub mod metrics;
pub mod services;
pub mod token;
pub mod utils;
pub mod workers;
