use async_trait::async_trait;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::context::{ContextError, RequestContext};
use crate::error::{ErrorKind, HasErrorKind};

// ============================================================================
// Collaborator Contracts - one-time codes and outbound mail
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Collaborator backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl HasErrorKind for CollaboratorError {
    fn kind(&self) -> ErrorKind {
        match self {
            CollaboratorError::Backend(_) => ErrorKind::Infrastructure,
            CollaboratorError::Context(_) => ErrorKind::Cancelled,
        }
    }
}

#[async_trait]
pub trait OtpRepository: Send + Sync {
    async fn save_code(
        &self,
        ctx: &RequestContext,
        email: &str,
        code: &str,
        ttl: Duration,
    ) -> Result<(), CollaboratorError>;

    async fn get_code(&self, ctx: &RequestContext, email: &str) -> Result<Option<String>, CollaboratorError>;

    /// Count a wrong guess against the current code; returns the total so far.
    async fn record_failed_attempt(&self, ctx: &RequestContext, email: &str) -> Result<u32, CollaboratorError>;

    async fn delete_code(&self, ctx: &RequestContext, email: &str) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, ctx: &RequestContext, to: &str, subject: &str, body: &str) -> Result<(), CollaboratorError>;
}

/// Random decimal code of `len` digits.
pub fn generate_numeric_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

struct StoredCode {
    code: String,
    expires_at: Instant,
    failures: u32,
}

#[derive(Default)]
pub struct InMemoryOtpRepository {
    codes: RwLock<HashMap<String, StoredCode>>,
}

impl InMemoryOtpRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpRepository for InMemoryOtpRepository {
    async fn save_code(
        &self,
        ctx: &RequestContext,
        email: &str,
        code: &str,
        ttl: Duration,
    ) -> Result<(), CollaboratorError> {
        ctx.check()?;
        self.codes.write().await.insert(
            email.to_string(),
            StoredCode {
                code: code.to_string(),
                expires_at: Instant::now() + ttl,
                failures: 0,
            },
        );
        Ok(())
    }

    async fn get_code(&self, ctx: &RequestContext, email: &str) -> Result<Option<String>, CollaboratorError> {
        ctx.check()?;
        Ok(self
            .codes
            .read()
            .await
            .get(email)
            .filter(|stored| stored.expires_at > Instant::now())
            .map(|stored| stored.code.clone()))
    }

    async fn record_failed_attempt(&self, ctx: &RequestContext, email: &str) -> Result<u32, CollaboratorError> {
        ctx.check()?;
        Ok(self.codes.write().await.get_mut(email).map_or(0, |stored| {
            stored.failures += 1;
            stored.failures
        }))
    }

    async fn delete_code(&self, ctx: &RequestContext, email: &str) -> Result<(), CollaboratorError> {
        ctx.check()?;
        self.codes.write().await.remove(email);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Keeps every message instead of delivering it.
#[derive(Default)]
pub struct InMemoryMailSender {
    outbox: Mutex<Vec<SentMail>>,
}

impl InMemoryMailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<SentMail> {
        self.outbox.lock().await.clone()
    }
}

#[async_trait]
impl MailSender for InMemoryMailSender {
    async fn send(&self, ctx: &RequestContext, to: &str, subject: &str, body: &str) -> Result<(), CollaboratorError> {
        ctx.check()?;
        self.outbox.lock().await.push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Writes the message to the log. Stand-in for a real mail transport.
pub struct LoggingMailSender;

#[async_trait]
impl MailSender for LoggingMailSender {
    async fn send(&self, ctx: &RequestContext, to: &str, subject: &str, _body: &str) -> Result<(), CollaboratorError> {
        ctx.check()?;
        tracing::info!(to = %to, subject = %subject, "📧 Mail dispatched");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Redis
// ----------------------------------------------------------------------------

fn otp_key(email: &str) -> String {
    format!("otp:{email}")
}

fn otp_attempts_key(email: &str) -> String {
    format!("otp_attempts:{email}")
}

#[derive(Clone)]
pub struct RedisOtpRepository {
    conn: MultiplexedConnection,
}

impl RedisOtpRepository {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

/// Code and a fresh attempt counter, both expiring with the code.
fn save_pipeline(email: &str, code: &str, ttl: Duration) -> redis::Pipeline {
    let secs = ttl.as_secs().max(1);
    let mut pipe = redis::pipe();
    pipe.atomic()
        .set_ex(otp_key(email), code, secs)
        .ignore()
        .del(otp_attempts_key(email))
        .ignore();
    pipe
}

fn backend(err: redis::RedisError) -> CollaboratorError {
    CollaboratorError::Backend(err.to_string())
}

#[async_trait]
impl OtpRepository for RedisOtpRepository {
    async fn save_code(
        &self,
        ctx: &RequestContext,
        email: &str,
        code: &str,
        ttl: Duration,
    ) -> Result<(), CollaboratorError> {
        let mut conn = self.conn.clone();
        let pipe = save_pipeline(email, code, ttl);
        ctx.run(pipe.query_async::<()>(&mut conn))
            .await?
            .map_err(backend)
    }

    async fn get_code(&self, ctx: &RequestContext, email: &str) -> Result<Option<String>, CollaboratorError> {
        let mut conn = self.conn.clone();
        ctx.run(conn.get::<_, Option<String>>(otp_key(email)))
            .await?
            .map_err(backend)
    }

    async fn record_failed_attempt(&self, ctx: &RequestContext, email: &str) -> Result<u32, CollaboratorError> {
        let mut conn = self.conn.clone();
        let key = otp_attempts_key(email);

        let mut pipe = redis::pipe();
        pipe.atomic().incr(&key, 1).ttl(otp_key(email));
        let (failures, remaining): (u32, i64) = ctx
            .run(pipe.query_async(&mut conn))
            .await?
            .map_err(backend)?;

        // the counter lives no longer than the code it guards

        if remaining > 0 {
            ctx.run(conn.expire::<_, ()>(&key, remaining))
                .await?
                .map_err(backend)?;
        }
        Ok(failures)
    }

    async fn delete_code(&self, ctx: &RequestContext, email: &str) -> Result<(), CollaboratorError> {
        let mut conn = self.conn.clone();
        ctx.run(conn.del::<_, ()>(vec![otp_key(email), otp_attempts_key(email)]))
            .await?
            .map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_code_shape() {
        let code = generate_numeric_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert!(generate_numeric_code(0).is_empty());
    }

    #[tokio::test]
    async fn test_otp_roundtrip_and_expiry() {
        let repo = InMemoryOtpRepository::new();
        let ctx = RequestContext::background();

        repo.save_code(&ctx, "a@x.com", "123456", Duration::from_millis(30)).await.unwrap();
        assert_eq!(repo.get_code(&ctx, "a@x.com").await.unwrap().as_deref(), Some("123456"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(repo.get_code(&ctx, "a@x.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_code() {
        let repo = InMemoryOtpRepository::new();
        let ctx = RequestContext::background();

        repo.save_code(&ctx, "a@x.com", "1", Duration::from_secs(60)).await.unwrap();
        repo.delete_code(&ctx, "a@x.com").await.unwrap();
        assert_eq!(repo.get_code(&ctx, "a@x.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_attempts_count_until_code_is_replaced() {
        let repo = InMemoryOtpRepository::new();
        let ctx = RequestContext::background();

        assert_eq!(repo.record_failed_attempt(&ctx, "a@x.com").await.unwrap(), 0);

        repo.save_code(&ctx, "a@x.com", "1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(repo.record_failed_attempt(&ctx, "a@x.com").await.unwrap(), 1);
        assert_eq!(repo.record_failed_attempt(&ctx, "a@x.com").await.unwrap(), 2);

        repo.save_code(&ctx, "a@x.com", "2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(repo.record_failed_attempt(&ctx, "a@x.com").await.unwrap(), 1);
    }

    #[test]
    fn test_save_pipeline_resets_attempts() {
        let packed = save_pipeline("a@x.com", "123456", Duration::from_secs(600)).get_packed_pipeline();
        let packed = String::from_utf8_lossy(&packed);

        assert!(packed.contains("otp:a@x.com"));
        assert!(packed.contains("600"));
        assert!(packed.contains("otp_attempts:a@x.com"));
        assert!(packed.contains("DEL"));
    }

    #[tokio::test]
    async fn test_mail_outbox() {
        let mail = InMemoryMailSender::new();
        mail.send(&RequestContext::background(), "a@x.com", "Hi", "body").await.unwrap();

        let sent = mail.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
    }
}
