use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::context::RequestContext;

use super::claims::TokenKind;
use super::errors::TokenStoreError;

// ============================================================================
// Token Repository & Revocation Cache
// ============================================================================
//
// The repository is the source of truth: a token verifies only while its
// jti is stored. The revocation cache is a best-effort fast path keyed by
// the raw signed string.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub jti: String,
    pub token: String,
    pub kind: TokenKind,
    pub subject_email: String,
    pub device_id: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Lifetime left at `now`; zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Persist all records or none of them.
    async fn save(&self, ctx: &RequestContext, records: &[TokenRecord]) -> Result<(), TokenStoreError>;

    async fn get(&self, ctx: &RequestContext, jti: &str) -> Result<Option<TokenRecord>, TokenStoreError>;

    async fn list_by_subject(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Vec<TokenRecord>, TokenStoreError>;

    async fn delete(&self, ctx: &RequestContext, jti: &str) -> Result<Option<TokenRecord>, TokenStoreError>;

    /// Returns the deleted records.
    async fn delete_by_device(
        &self,
        ctx: &RequestContext,
        email: &str,
        device_id: &str,
    ) -> Result<Vec<TokenRecord>, TokenStoreError>;

    /// Returns the deleted records.
    async fn delete_by_subject(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Vec<TokenRecord>, TokenStoreError>;

    /// Devices holding a refresh token for `email`.
    async fn device_ids(&self, ctx: &RequestContext, email: &str) -> Result<Vec<String>, TokenStoreError> {
        let records = self.list_by_subject(ctx, email).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.kind == TokenKind::Refresh)
            .map(|r| r.device_id)
            .collect())
    }
}

#[async_trait]
pub trait RevocationCache: Send + Sync {
    async fn revoke(
        &self,
        ctx: &RequestContext,
        token: &str,
        subject_email: &str,
        ttl: Duration,
    ) -> Result<(), TokenStoreError>;

    async fn is_revoked(&self, ctx: &RequestContext, token: &str) -> Result<bool, TokenStoreError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

#[derive(Default)]
pub struct InMemoryTokenRepository {
    records: RwLock<HashMap<String, TokenRecord>>,
}

impl InMemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn remove_where<P>(&self, predicate: P) -> Vec<TokenRecord>
    where
        P: Fn(&TokenRecord) -> bool + Send,
    {
        let mut records = self.records.write().await;
        let jtis: Vec<String> = records
            .values()
            .filter(|r| predicate(*r))
            .map(|r| r.jti.clone())
            .collect();
        jtis.iter().filter_map(|jti| records.remove(jti)).collect()
    }
}

#[async_trait]
impl TokenRepository for InMemoryTokenRepository {
    async fn save(&self, ctx: &RequestContext, records: &[TokenRecord]) -> Result<(), TokenStoreError> {
        ctx.check()?;
        let mut stored = self.records.write().await;
        for record in records {
            stored.insert(record.jti.clone(), record.clone());
        }
        Ok(())
    }

    async fn get(&self, ctx: &RequestContext, jti: &str) -> Result<Option<TokenRecord>, TokenStoreError> {
        ctx.check()?;
        let now = Utc::now();
        Ok(self
            .records
            .read()
            .await
            .get(jti)
            .filter(|r| r.expires_at > now)
            .cloned())
    }

    async fn list_by_subject(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Vec<TokenRecord>, TokenStoreError> {
        ctx.check()?;
        let now = Utc::now();
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.subject_email == email && r.expires_at > now)
            .cloned()
            .collect())
    }

    async fn delete(&self, ctx: &RequestContext, jti: &str) -> Result<Option<TokenRecord>, TokenStoreError> {
        ctx.check()?;
        Ok(self.records.write().await.remove(jti))
    }

    async fn delete_by_device(
        &self,
        ctx: &RequestContext,
        email: &str,
        device_id: &str,
    ) -> Result<Vec<TokenRecord>, TokenStoreError> {
        ctx.check()?;
        Ok(self
            .remove_where(|r| r.subject_email == email && r.device_id == device_id)
            .await)
    }

    async fn delete_by_subject(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Vec<TokenRecord>, TokenStoreError> {
        ctx.check()?;
        Ok(self.remove_where(|r| r.subject_email == email).await)
    }
}

#[derive(Default)]
pub struct InMemoryRevocationCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemoryRevocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subject email stored for a revoked token, if the entry is still live.
    pub async fn subject_of(&self, token: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(token)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(email, _)| email.clone())
    }
}

#[async_trait]
impl RevocationCache for InMemoryRevocationCache {
    async fn revoke(
        &self,
        ctx: &RequestContext,
        token: &str,
        subject_email: &str,
        ttl: Duration,
    ) -> Result<(), TokenStoreError> {
        ctx.check()?;
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(token.to_string(), (subject_email.to_string(), now + ttl));
        Ok(())
    }

    async fn is_revoked(&self, ctx: &RequestContext, token: &str) -> Result<bool, TokenStoreError> {
        ctx.check()?;
        Ok(self.subject_of(token).await.is_some())
    }
}
