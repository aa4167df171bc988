use crate::context::ContextError;
use crate::error::{ErrorKind, HasErrorKind};

use super::claims::TokenKind;

// ============================================================================
// Token Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("Token store backend error: {0}")]
    Backend(String),

    #[error("Corrupt token record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Revocation cache unavailable: circuit open")]
    CircuitOpen,

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl TokenStoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        TokenStoreError::Backend(err.to_string())
    }
}

impl HasErrorKind for TokenStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            TokenStoreError::Context(_) => ErrorKind::Cancelled,
            _ => ErrorKind::Infrastructure,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Unexpected signing algorithm: {0}")]
    AlgorithmMismatch(String),

    #[error("Token revoked")]
    Revoked,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Expected {expected} token, got {found}")]
    WrongKind { expected: TokenKind, found: TokenKind },

    #[error("Key error: {0}")]
    Key(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Store(#[from] TokenStoreError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl HasErrorKind for TokenError {
    fn kind(&self) -> ErrorKind {
        match self {
            TokenError::Expired
            | TokenError::AlgorithmMismatch(_)
            | TokenError::Revoked
            | TokenError::Invalid(_)
            | TokenError::WrongKind { .. } => ErrorKind::Unauthorized,
            TokenError::Key(_) | TokenError::Signing(_) => ErrorKind::Infrastructure,
            TokenError::Store(e) => e.kind(),
            TokenError::Context(_) => ErrorKind::Cancelled,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind as JwtErrorKind;

        match err.kind() {
            JwtErrorKind::ExpiredSignature => TokenError::Expired,
            JwtErrorKind::InvalidAlgorithm => TokenError::AlgorithmMismatch(err.to_string()),
            _ => TokenError::Invalid(err.to_string()),
        }
    }
}
