use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::context::{ContextError, RequestContext};
use crate::error::{ErrorKind, HasErrorKind};
use crate::utils::IsTransient;
use super::value_objects::{DeviceToken, Email, IsMentor, PasswordHash};

// ============================================================================
// Account Read Model - projected current state
// ============================================================================
//
// Eventually consistent copy of each account, written only by the
// projection. Email is unique and mutable: `update` locates the existing
// row by the email it had before the change.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub id: Uuid,
    pub email: Email,
    pub password_hash: PasswordHash,
    pub is_mentor: IsMentor,
    pub device_token: DeviceToken,
}

#[derive(Debug, thiserror::Error)]
pub enum ReadModelError {
    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    #[error("Account id already present: {0}")]
    DuplicateId(Uuid),

    #[error("Read model database error: {0}")]
    Database(String),

    #[error("Corrupt read model row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl ReadModelError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        ReadModelError::Database(err.to_string())
    }
}

impl HasErrorKind for ReadModelError {
    fn kind(&self) -> ErrorKind {
        match self {
            ReadModelError::NotFound(_) => ErrorKind::NotFound,
            ReadModelError::DuplicateEmail(_) | ReadModelError::DuplicateId(_) => ErrorKind::Conflict,
            ReadModelError::Database(_) | ReadModelError::Corrupt(_) => ErrorKind::Infrastructure,
            ReadModelError::Context(_) => ErrorKind::Cancelled,
        }
    }
}

impl IsTransient for ReadModelError {
    fn is_transient(&self) -> bool {
        matches!(self, ReadModelError::Database(_))
    }
}

#[async_trait]
pub trait AccountReadModel: Send + Sync {
    async fn get_by_email(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<AccountRecord, ReadModelError>;

    async fn get_by_id(&self, ctx: &RequestContext, id: Uuid) -> Result<AccountRecord, ReadModelError>;

    /// Insert a new row. Fails if the id or the email is already present.
    async fn save(&self, ctx: &RequestContext, record: AccountRecord) -> Result<(), ReadModelError>;

    /// Replace the row currently stored under `searched_email`.
    async fn update(
        &self,
        ctx: &RequestContext,
        record: AccountRecord,
        searched_email: &str,
    ) -> Result<(), ReadModelError>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Default)]
struct Rows {
    by_id: HashMap<Uuid, AccountRecord>,
    by_email: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct InMemoryAccountReadModel {
    rows: RwLock<Rows>,
}

impl InMemoryAccountReadModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AccountReadModel for InMemoryAccountReadModel {
    async fn get_by_email(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<AccountRecord, ReadModelError> {
        ctx.check()?;
        let rows = self.rows.read().await;
        rows.by_email
            .get(email)
            .and_then(|id| rows.by_id.get(id))
            .cloned()
            .ok_or_else(|| ReadModelError::NotFound(email.to_string()))
    }

    async fn get_by_id(&self, ctx: &RequestContext, id: Uuid) -> Result<AccountRecord, ReadModelError> {
        ctx.check()?;
        self.rows
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| ReadModelError::NotFound(id.to_string()))
    }

    async fn save(&self, ctx: &RequestContext, record: AccountRecord) -> Result<(), ReadModelError> {
        ctx.check()?;
        let mut rows = self.rows.write().await;

        if rows.by_email.contains_key(record.email.as_str()) {
            return Err(ReadModelError::DuplicateEmail(record.email.to_string()));
        }
        if rows.by_id.contains_key(&record.id) {
            return Err(ReadModelError::DuplicateId(record.id));
        }

        rows.by_email.insert(record.email.to_string(), record.id);
        rows.by_id.insert(record.id, record);
        Ok(())
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        record: AccountRecord,
        searched_email: &str,
    ) -> Result<(), ReadModelError> {
        ctx.check()?;
        let mut rows = self.rows.write().await;

        let existing_id = *rows
            .by_email
            .get(searched_email)
            .ok_or_else(|| ReadModelError::NotFound(searched_email.to_string()))?;

        if let Some(owner) = rows.by_email.get(record.email.as_str()) {
            if *owner != existing_id {
                return Err(ReadModelError::DuplicateEmail(record.email.to_string()));
            }
        }

        rows.by_email.remove(searched_email);
        rows.by_id.remove(&existing_id);
        rows.by_email.insert(record.email.to_string(), record.id);
        rows.by_id.insert(record.id, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Uuid, email: &str) -> AccountRecord {
        AccountRecord {
            id,
            email: Email::parse(email).unwrap(),
            password_hash: PasswordHash::from_hash("$2b$04$hash"),
            is_mentor: IsMentor(false),
            device_token: DeviceToken::default(),
        }
    }

    #[tokio::test]
    async fn test_save_and_lookup_both_keys() {
        let model = InMemoryAccountReadModel::new();
        let ctx = RequestContext::background();
        let id = Uuid::new_v4();

        model.save(&ctx, record(id, "a@x.com")).await.unwrap();

        assert_eq!(model.get_by_email(&ctx, "a@x.com").await.unwrap().id, id);
        assert_eq!(model.get_by_id(&ctx, id).await.unwrap().email.as_str(), "a@x.com");
    }

    #[tokio::test]
    async fn test_save_rejects_duplicate_email() {
        let model = InMemoryAccountReadModel::new();
        let ctx = RequestContext::background();

        model.save(&ctx, record(Uuid::new_v4(), "a@x.com")).await.unwrap();
        let result = model.save(&ctx, record(Uuid::new_v4(), "a@x.com")).await;

        assert!(matches!(result, Err(ReadModelError::DuplicateEmail(_))));
        assert_eq!(model.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_moves_natural_key() {
        let model = InMemoryAccountReadModel::new();
        let ctx = RequestContext::background();
        let id = Uuid::new_v4();

        model.save(&ctx, record(id, "a@x.com")).await.unwrap();
        model.update(&ctx, record(id, "b@x.com"), "a@x.com").await.unwrap();

        assert!(matches!(
            model.get_by_email(&ctx, "a@x.com").await,
            Err(ReadModelError::NotFound(_))
        ));
        assert_eq!(model.get_by_email(&ctx, "b@x.com").await.unwrap().id, id);
        assert_eq!(model.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_into_taken_email_conflicts() {
        let model = InMemoryAccountReadModel::new();
        let ctx = RequestContext::background();
        let a = Uuid::new_v4();

        model.save(&ctx, record(a, "a@x.com")).await.unwrap();
        model.save(&ctx, record(Uuid::new_v4(), "b@x.com")).await.unwrap();

        let result = model.update(&ctx, record(a, "b@x.com"), "a@x.com").await;
        assert!(matches!(result, Err(ReadModelError::DuplicateEmail(_))));
        assert_eq!(model.get_by_email(&ctx, "a@x.com").await.unwrap().id, a);
    }

    #[tokio::test]
    async fn test_update_unknown_email_is_not_found() {
        let model = InMemoryAccountReadModel::new();
        let ctx = RequestContext::background();

        let result = model.update(&ctx, record(Uuid::new_v4(), "b@x.com"), "a@x.com").await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
    }
}
