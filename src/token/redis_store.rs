use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;

use crate::context::RequestContext;
use crate::utils::{retry_with_backoff, CircuitBreaker, CircuitBreakerError, RetryConfig};

use super::errors::TokenStoreError;
use super::repository::{RevocationCache, TokenRecord, TokenRepository};

// ============================================================================
// Redis Token Store
// ============================================================================
//
// Keys:
// - token:{jti}             JSON TokenRecord, expires with the token
// - subject_tokens:{email}  set of jti issued to a subject
// - {raw signed token}      revocation entry, value = subject email
//
// Set members whose token key already expired are pruned on read. The set
// itself is re-armed to expire after the longest refresh lifetime on every
// save, so an idle subject's set disappears with its last token.
//
// ============================================================================

fn token_key(jti: &str) -> String {
    format!("token:{jti}")
}

fn subject_key(email: &str) -> String {
    format!("subject_tokens:{email}")
}

/// Open a multiplexed connection, retrying refused connects with backoff.
/// A malformed URL fails at once.
pub async fn connect(redis_url: &str, retry: RetryConfig) -> Result<MultiplexedConnection, TokenStoreError> {
    let client = Client::open(redis_url).map_err(TokenStoreError::backend)?;

    let conn = retry_with_backoff(retry, |attempt| {
        let client = client.clone();
        async move {
            tracing::debug!(attempt, "Connecting to Redis...");
            client.get_multiplexed_async_connection().await
        }
    })
    .await
    .into_result()
    .map_err(TokenStoreError::backend)?;

    tracing::info!(redis_url = %redis_url, "✅ Connected to Redis");
    Ok(conn)
}

/// Default lifetime of a subject's token set; matches the default refresh TTL.
const DEFAULT_SUBJECT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

fn save_pipeline(
    records: &[TokenRecord],
    now: chrono::DateTime<Utc>,
    subject_ttl: Duration,
) -> Result<redis::Pipeline, TokenStoreError> {
    let mut pipe = redis::pipe();
    pipe.atomic();

    let subject_secs = subject_ttl.as_secs().max(1) as i64;
    for record in records {
        let ttl = record.remaining(now).as_secs().max(1);
        let set = subject_key(&record.subject_email);
        pipe.set_ex(token_key(&record.jti), serde_json::to_string(record)?, ttl)
            .ignore()
            .sadd(&set, &record.jti)
            .ignore()
            .expire(&set, subject_secs)
            .ignore();
    }
    Ok(pipe)
}

#[derive(Clone)]
pub struct RedisTokenRepository {
    conn: MultiplexedConnection,
    subject_ttl: Duration,
}

impl RedisTokenRepository {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            subject_ttl: DEFAULT_SUBJECT_TTL,
        }
    }

    /// Lifetime of `subject_tokens:{email}`; use the longest token TTL.
    pub fn with_subject_ttl(mut self, ttl: Duration) -> Self {
        self.subject_ttl = ttl;
        self
    }

    async fn fetch(&self, jti: &str) -> Result<Option<TokenRecord>, TokenStoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(token_key(jti)).await.map_err(TokenStoreError::backend)?;

        value
            .map(|json| serde_json::from_str(&json).map_err(TokenStoreError::from))
            .transpose()
    }

    async fn load_subject(&self, email: &str) -> Result<Vec<TokenRecord>, TokenStoreError> {
        let mut conn = self.conn.clone();
        let set = subject_key(email);

        let jtis: Vec<String> = conn.smembers(&set).await.map_err(TokenStoreError::backend)?;
        if jtis.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = jtis.iter().map(|jti| token_key(jti)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(TokenStoreError::backend)?;

        let mut records = Vec::with_capacity(values.len());
        let mut stale = Vec::new();
        for (jti, value) in jtis.into_iter().zip(values) {
            match value {
                Some(json) => records.push(serde_json::from_str::<TokenRecord>(&json)?),
                None => stale.push(jti),
            }
        }

        if !stale.is_empty() {
            conn.srem::<_, _, ()>(&set, &stale)
                .await
                .map_err(TokenStoreError::backend)?;
            tracing::debug!(subject = %email, pruned = stale.len(), "Pruned expired token ids");
        }
        Ok(records)
    }

    async fn remove(&self, email: &str, records: &[TokenRecord]) -> Result<(), TokenStoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = records.iter().map(|r| token_key(&r.jti)).collect();
        let jtis: Vec<&str> = records.iter().map(|r| r.jti.as_str()).collect();

        redis::pipe()
            .atomic()
            .del(&keys)
            .ignore()
            .srem(subject_key(email), &jtis)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(TokenStoreError::backend)
    }
}

#[async_trait]
impl TokenRepository for RedisTokenRepository {
    async fn save(&self, ctx: &RequestContext, records: &[TokenRecord]) -> Result<(), TokenStoreError> {
        let pipe = save_pipeline(records, Utc::now(), self.subject_ttl)?;

        let mut conn = self.conn.clone();
        ctx.run(pipe.query_async::<()>(&mut conn))
            .await?
            .map_err(TokenStoreError::backend)
    }

    async fn get(&self, ctx: &RequestContext, jti: &str) -> Result<Option<TokenRecord>, TokenStoreError> {
        ctx.run(self.fetch(jti)).await?
    }

    async fn list_by_subject(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Vec<TokenRecord>, TokenStoreError> {
        ctx.run(self.load_subject(email)).await?
    }

    async fn delete(&self, ctx: &RequestContext, jti: &str) -> Result<Option<TokenRecord>, TokenStoreError> {
        ctx.run(async {
            let Some(record) = self.fetch(jti).await? else {
                return Ok(None);
            };
            self.remove(&record.subject_email, std::slice::from_ref(&record)).await?;
            Ok(Some(record))
        })
        .await?
    }

    async fn delete_by_device(
        &self,
        ctx: &RequestContext,
        email: &str,
        device_id: &str,
    ) -> Result<Vec<TokenRecord>, TokenStoreError> {
        ctx.run(async {
            let matching: Vec<TokenRecord> = self
                .load_subject(email)
                .await?
                .into_iter()
                .filter(|r| r.device_id == device_id)
                .collect();
            self.remove(email, &matching).await?;
            Ok(matching)
        })
        .await?
    }

    async fn delete_by_subject(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Vec<TokenRecord>, TokenStoreError> {
        ctx.run(async {
            let records = self.load_subject(email).await?;
            self.remove(email, &records).await?;
            Ok(records)
        })
        .await?
    }
}

/// Revocation cache in Redis, short-circuited by a breaker so a Redis
/// outage does not add a timeout to every verification.
pub struct RedisRevocationCache {
    conn: MultiplexedConnection,
    breaker: CircuitBreaker,
}

impl RedisRevocationCache {
    pub fn new(conn: MultiplexedConnection, breaker: CircuitBreaker) -> Self {
        Self { conn, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

fn from_breaker(err: CircuitBreakerError<redis::RedisError>) -> TokenStoreError {
    match err {
        CircuitBreakerError::CircuitOpen => TokenStoreError::CircuitOpen,
        CircuitBreakerError::OperationFailed(e) => TokenStoreError::backend(e),
    }
}

#[async_trait]
impl RevocationCache for RedisRevocationCache {
    async fn revoke(
        &self,
        ctx: &RequestContext,
        token: &str,
        subject_email: &str,
        ttl: Duration,
    ) -> Result<(), TokenStoreError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);

        ctx.run(self.breaker.call(conn.set_ex::<_, _, ()>(token, subject_email, seconds)))
            .await?
            .map_err(from_breaker)
    }

    async fn is_revoked(&self, ctx: &RequestContext, token: &str) -> Result<bool, TokenStoreError> {
        let mut conn = self.conn.clone();
        ctx.run(self.breaker.call(conn.exists::<_, bool>(token)))
            .await?
            .map_err(from_breaker)
    }
}
