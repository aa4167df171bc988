use chrono::Utc;
use futures_util::future::join_all;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::metrics::Metrics;

use super::claims::{Claims, IssuedToken, TokenConfig, TokenKind, TokenPair, TokenSubject};
use super::errors::{TokenError, TokenStoreError};
use super::keys::SigningKeys;
use super::repository::{RevocationCache, TokenRecord, TokenRepository};

// ============================================================================
// Token Service - issue, verify, rotate, revoke
// ============================================================================
//
// Verification order:
//   revocation cache → header algorithm → signature/expiry → issuer → jti
//
// Only the repository decides validity; the cache can reject early but is
// never required to accept.
//
// ============================================================================

const RSA_FAMILY: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// A token whose revocation could not be mirrored into the cache.
#[derive(Debug)]
pub struct RevocationFailure {
    pub jti: String,
    pub error: TokenStoreError,
}

#[derive(Debug, Default)]
pub struct RevocationReport {
    /// Records deleted from the repository
    pub revoked: usize,
    pub failures: Vec<RevocationFailure>,
}

impl RevocationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct TokenService {
    keys: SigningKeys,
    repository: Arc<dyn TokenRepository>,
    cache: Arc<dyn RevocationCache>,
    config: TokenConfig,
    validation: Validation,
    metrics: Option<Arc<Metrics>>,
}

impl TokenService {
    pub fn new(
        keys: SigningKeys,
        repository: Arc<dyn TokenRepository>,
        cache: Arc<dyn RevocationCache>,
        config: TokenConfig,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = RSA_FAMILY.to_vec();
        validation.leeway = 0;
        validation.validate_aud = false;

        Self {
            keys,
            repository,
            cache,
            config,
            validation,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn TokenRepository> {
        &self.repository
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::RS256), claims, &self.keys.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn mint(&self, kind: TokenKind, subject: &TokenSubject) -> Result<(IssuedToken, TokenRecord), TokenError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.config.ttl_for(kind))
            .map_err(|e| TokenError::Signing(format!("ttl out of range: {e}")))?;
        let expires_at = now + ttl;

        let claims = Claims {
            token_type: kind,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            device_id: subject.device_id.clone(),
            issuer: self.config.issuer.clone(),
            subject: subject.email.clone(),
            subject_id: subject.subject_id,
            is_mentor: subject.is_mentor,
        };
        let token = self.sign(&claims)?;

        let record = TokenRecord {
            jti: claims.jti.clone(),
            token: token.clone(),
            kind,
            subject_email: subject.email.clone(),
            device_id: subject.device_id.clone(),
            expires_at,
        };
        Ok((IssuedToken { token, claims }, record))
    }

    fn record_issued(&self, tokens: &[&IssuedToken]) {
        for issued in tokens {
            tracing::debug!(
                jti = %issued.claims.jti,
                kind = %issued.claims.token_type,
                subject = %issued.claims.subject,
                device_id = %issued.claims.device_id,
                "Token issued"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_token_issued(issued.claims.token_type.as_str());
            }
        }
    }

    pub async fn issue(
        &self,
        ctx: &RequestContext,
        kind: TokenKind,
        subject: &TokenSubject,
    ) -> Result<IssuedToken, TokenError> {
        let (issued, record) = self.mint(kind, subject)?;
        self.repository.save(ctx, &[record]).await?;
        self.record_issued(&[&issued]);
        Ok(issued)
    }

    /// Access and refresh token persisted together.
    pub async fn issue_pair(&self, ctx: &RequestContext, subject: &TokenSubject) -> Result<TokenPair, TokenError> {
        let (access, access_record) = self.mint(TokenKind::Access, subject)?;
        let (refresh, refresh_record) = self.mint(TokenKind::Refresh, subject)?;

        self.repository.save(ctx, &[access_record, refresh_record]).await?;
        self.record_issued(&[&access, &refresh]);

        tracing::info!(subject = %subject.email, device_id = %subject.device_id, "🔐 Token pair issued");
        Ok(TokenPair { access, refresh })
    }

    pub async fn verify(&self, ctx: &RequestContext, token: &str) -> Result<Claims, TokenError> {
        let result = self.verify_inner(ctx, token).await;
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => "valid",
                Err(TokenError::Expired) => "expired",
                Err(TokenError::Revoked) => "revoked",
                Err(_) => "rejected",
            };
            metrics.record_token_verified(outcome);
        }
        result
    }

    async fn verify_inner(&self, ctx: &RequestContext, token: &str) -> Result<Claims, TokenError> {
        match self.cache.is_revoked(ctx, token).await {
            Ok(true) => return Err(TokenError::Revoked),
            Ok(false) => {}
            Err(TokenStoreError::Context(e)) => return Err(e.into()),
            Err(e) => tracing::warn!(error = %e, "Revocation cache unavailable, falling back to repository"),
        }

        let header = decode_header(token)?;
        if !RSA_FAMILY.contains(&header.alg) {
            return Err(TokenError::AlgorithmMismatch(format!("{:?}", header.alg)));
        }

        let claims = decode::<Claims>(token, &self.keys.decoding, &self.validation)?.claims;

        if claims.issuer != self.config.issuer {
            return Err(TokenError::Invalid(format!("unexpected issuer {}", claims.issuer)));
        }

        if self.repository.get(ctx, &claims.jti).await?.is_none() {
            return Err(TokenError::Revoked);
        }
        Ok(claims)
    }

    /// Mint a new access token from a refresh token. The refresh token is
    /// returned unchanged and stays valid.
    pub async fn rotate(&self, ctx: &RequestContext, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let claims = self.verify(ctx, refresh_token).await?;
        if claims.token_type != TokenKind::Refresh {
            return Err(TokenError::WrongKind {
                expected: TokenKind::Refresh,
                found: claims.token_type,
            });
        }

        let record = self
            .repository
            .get(ctx, &claims.jti)
            .await?
            .ok_or(TokenError::Revoked)?;

        let subject = TokenSubject {
            email: record.subject_email,
            subject_id: claims.subject_id,
            device_id: record.device_id,
            is_mentor: claims.is_mentor,
        };
        let access = self.issue(ctx, TokenKind::Access, &subject).await?;

        tracing::info!(subject = %subject.email, device_id = %subject.device_id, "Access token rotated");
        Ok(TokenPair {
            access,
            refresh: IssuedToken {
                token: refresh_token.to_string(),
                claims,
            },
        })
    }

    /// Revoke every token of one device.
    pub async fn revoke(
        &self,
        ctx: &RequestContext,
        email: &str,
        device_id: &str,
    ) -> Result<RevocationReport, TokenError> {
        let removed = self.repository.delete_by_device(ctx, email, device_id).await?;
        let report = self.mirror(ctx, email, &removed).await;

        tracing::info!(
            subject = %email,
            device_id = %device_id,
            revoked = report.revoked,
            mirror_failures = report.failures.len(),
            "Device tokens revoked"
        );
        Ok(report)
    }

    /// Revoke every token of a subject. Mirror failures do not stop the
    /// remaining tokens from being processed.
    pub async fn revoke_all(&self, ctx: &RequestContext, email: &str) -> Result<RevocationReport, TokenError> {
        let removed = self.repository.delete_by_subject(ctx, email).await?;
        let report = self.mirror(ctx, email, &removed).await;

        tracing::info!(
            subject = %email,
            revoked = report.revoked,
            mirror_failures = report.failures.len(),
            "All tokens revoked"
        );
        Ok(report)
    }

    async fn mirror(&self, ctx: &RequestContext, email: &str, removed: &[TokenRecord]) -> RevocationReport {
        let now = Utc::now();

        let outcomes = join_all(removed.iter().map(|record| async move {
            let ttl = record.remaining(now);
            if ttl.is_zero() {
                return Ok(());
            }
            self.cache
                .revoke(ctx, &record.token, email, ttl)
                .await
                .map_err(|error| RevocationFailure {
                    jti: record.jti.clone(),
                    error,
                })
        }))
        .await;

        let failures: Vec<RevocationFailure> = outcomes.into_iter().filter_map(Result::err).collect();
        for failure in &failures {
            tracing::warn!(jti = %failure.jti, error = %failure.error, "Failed to mirror revocation");
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_revocation(removed.len(), failures.len());
        }

        RevocationReport {
            revoked: removed.len(),
            failures,
        }
    }
}
