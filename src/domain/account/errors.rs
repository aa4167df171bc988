use uuid::Uuid;

use crate::context::ContextError;
use crate::error::{ErrorKind, HasErrorKind};
use crate::event_sourcing::store::EventStoreError;
use super::read_model::ReadModelError;

// ============================================================================
// Account Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    #[error("Password must be at least 6 characters with upper, lower, digit and special characters")]
    WeakPassword,

    #[error("Password hashing failed: {0}")]
    PasswordHashing(String),

    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Email already registered: {0}")]
    EmailTaken(String),

    #[error("Account already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Failed to decode {event_type} event of aggregate {aggregate_id}: {source}")]
    EventDecode {
        event_type: String,
        aggregate_id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode event: {0}")]
    EventEncode(#[source] serde_json::Error),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    ReadModel(#[from] ReadModelError),
}

impl From<ContextError> for AccountError {
    fn from(err: ContextError) -> Self {
        AccountError::Store(EventStoreError::Context(err))
    }
}

impl HasErrorKind for AccountError {
    fn kind(&self) -> ErrorKind {
        match self {
            AccountError::InvalidArgument(_)
            | AccountError::InvalidEmail(_)
            | AccountError::WeakPassword => ErrorKind::Validation,
            AccountError::NotFound(_) => ErrorKind::NotFound,
            AccountError::EmailTaken(_)
            | AccountError::AlreadyExists(_)
            | AccountError::InvalidCredentials => ErrorKind::Conflict,
            AccountError::PasswordHashing(_)
            | AccountError::EventDecode { .. }
            | AccountError::EventEncode(_) => ErrorKind::Infrastructure,
            AccountError::Store(e) => e.kind(),
            AccountError::ReadModel(e) => e.kind(),
        }
    }
}
