// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// One aggregate type: Account. Its subdirectory holds value objects,
// events, commands, errors, the aggregate, the command and query handlers,
// the read model and the projection that feeds it.
//
// ============================================================================

pub mod account;
