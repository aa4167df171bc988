// ============================================================================
// Token Module - signed credential lifecycle
// ============================================================================
//
// RS256 access/refresh pairs, persisted per jti in a TokenRepository and
// mirrored into a RevocationCache when revoked.
//
// ============================================================================

pub mod claims;
pub mod errors;
pub mod keys;
pub mod redis_store;
pub mod repository;
pub mod service;

pub use claims::{Claims, IssuedToken, TokenConfig, TokenKind, TokenPair, TokenSubject};
pub use errors::{TokenError, TokenStoreError};
pub use keys::SigningKeys;
pub use redis_store::{connect, RedisRevocationCache, RedisTokenRepository};
pub use repository::{
    InMemoryRevocationCache, InMemoryTokenRepository, RevocationCache, TokenRecord, TokenRepository,
};
pub use service::{RevocationFailure, RevocationReport, TokenService};
