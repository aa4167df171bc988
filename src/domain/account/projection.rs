use async_trait::async_trait;
use std::sync::Arc;

use crate::context::{ContextError, RequestContext};
use crate::error::{ErrorKind, HasErrorKind};
use crate::event_sourcing::core::EventEnvelope;
use crate::utils::IsTransient;

use super::errors::AccountError;
use super::events::AccountEvent;
use super::read_model::{AccountReadModel, AccountRecord, ReadModelError};
use super::value_objects::PasswordHash;

// ============================================================================
// Account Projection - event log → read model
// ============================================================================
//
// Runs inside the subscription worker. Delivery is at-least-once, so every
// handler tolerates seeing the same event twice.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Cannot decode {event_type} event {event_id}: {reason}")]
    Decode {
        event_id: uuid::Uuid,
        event_type: String,
        reason: String,
    },

    #[error("Read model row missing for account {0}")]
    MissingRow(uuid::Uuid),

    #[error("Read model conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    ReadModel(#[from] ReadModelError),
}

impl From<ContextError> for ProjectionError {
    fn from(err: ContextError) -> Self {
        ProjectionError::ReadModel(ReadModelError::Context(err))
    }
}

impl IsTransient for ProjectionError {
    fn is_transient(&self) -> bool {
        match self {
            ProjectionError::ReadModel(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl HasErrorKind for ProjectionError {
    fn kind(&self) -> ErrorKind {
        match self {
            ProjectionError::Decode { .. } => ErrorKind::Validation,
            ProjectionError::MissingRow(_) => ErrorKind::NotFound,
            ProjectionError::Conflict(_) => ErrorKind::Conflict,
            ProjectionError::ReadModel(e) => e.kind(),
        }
    }
}

#[async_trait]
pub trait ProjectionProcessor: Send + Sync {
    async fn process_event(&self, ctx: &RequestContext, event: &EventEnvelope) -> Result<(), ProjectionError>;
}

pub struct AccountProjection {
    read_model: Arc<dyn AccountReadModel>,
}

impl AccountProjection {
    pub fn new(read_model: Arc<dyn AccountReadModel>) -> Self {
        Self { read_model }
    }

    async fn existing(&self, ctx: &RequestContext, event: &EventEnvelope) -> Result<AccountRecord, ProjectionError> {
        match self.read_model.get_by_id(ctx, event.aggregate_id).await {
            Ok(record) => Ok(record),
            Err(ReadModelError::NotFound(_)) => Err(ProjectionError::MissingRow(event.aggregate_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_password(
        &self,
        ctx: &RequestContext,
        event: &EventEnvelope,
        password: PasswordHash,
    ) -> Result<(), ProjectionError> {
        let mut record = self.existing(ctx, event).await?;
        let searched = record.email.to_string();
        record.password_hash = password;
        self.read_model.update(ctx, record, &searched).await?;
        Ok(())
    }
}

fn decode_error(event: &EventEnvelope, err: AccountError) -> ProjectionError {
    ProjectionError::Decode {
        event_id: event.event_id,
        event_type: event.event_type.clone(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl ProjectionProcessor for AccountProjection {
    async fn process_event(&self, ctx: &RequestContext, event: &EventEnvelope) -> Result<(), ProjectionError> {
        let decoded = AccountEvent::decode(event).map_err(|e| decode_error(event, e))?;

        match decoded {
            Some(AccountEvent::RegisterAccount(e)) => {
                let record = AccountRecord {
                    id: e.id,
                    email: e.email,
                    password_hash: e.password,
                    is_mentor: e.is_mentor,
                    device_token: e.device_token,
                };
                let email = record.email.to_string();

                match self.read_model.save(ctx, record).await {
                    Ok(()) => {}
                    Err(ReadModelError::DuplicateId(id)) => {
                        tracing::debug!(account_id = %id, "Register already projected, skipping");
                    }
                    Err(ReadModelError::DuplicateEmail(_)) => {
                        // A redelivery of our own row is fine; another account owning it is not.
                        let owner = self.read_model.get_by_email(ctx, &email).await?;
                        if owner.id != event.aggregate_id {
                            return Err(ProjectionError::Conflict(format!(
                                "email {email} already owned by {}",
                                owner.id
                            )));
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Some(AccountEvent::ChangeEmail(e)) => {
                let mut record = self.existing(ctx, event).await?;
                let searched = record.email.to_string();
                record.email = e.email;

                self.read_model
                    .update(ctx, record, &searched)
                    .await
                    .map_err(|err| match err {
                        ReadModelError::DuplicateEmail(email) => ProjectionError::Conflict(format!(
                            "email {email} already owned by another account"
                        )),
                        other => other.into(),
                    })?;
            }
            Some(AccountEvent::ChangePassword(e)) => {
                self.replace_password(ctx, event, e.password).await?;
            }
            Some(AccountEvent::RestorePassword(e)) => {
                self.replace_password(ctx, event, e.password).await?;
            }
            None => {
                tracing::warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Unknown event type, projection skipped"
                );
                return Ok(());
            }
        }

        tracing::debug!(
            aggregate_id = %event.aggregate_id,
            event_type = %event.event_type,
            version = event.aggregate_version,
            "Projected event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::events::{ChangeEmail, ChangePassword, RegisterAccount, RestorePassword};
    use crate::domain::account::read_model::InMemoryAccountReadModel;
    use crate::domain::account::value_objects::{DeviceToken, Email, IsMentor};
    use uuid::Uuid;

    const TEST_COST: u32 = 4;

    fn setup() -> (Arc<InMemoryAccountReadModel>, AccountProjection, RequestContext) {
        let read_model = Arc::new(InMemoryAccountReadModel::new());
        let projection = AccountProjection::new(read_model.clone());
        (read_model, projection, RequestContext::background())
    }

    fn register(id: Uuid, email: &str) -> EventEnvelope {
        AccountEvent::RegisterAccount(RegisterAccount {
            id,
            email: Email::parse(email).unwrap(),
            password: PasswordHash::hash_with_cost("Valid1@", TEST_COST).unwrap(),
            is_mentor: IsMentor(false),
            device_token: DeviceToken::default(),
        })
        .into_envelope(id, 1)
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (read_model, projection, ctx) = setup();
        let id = Uuid::new_v4();
        let event = register(id, "a@x.com");

        projection.process_event(&ctx, &event).await.unwrap();
        projection.process_event(&ctx, &event).await.unwrap();

        assert_eq!(read_model.len().await, 1);
    }

    #[tokio::test]
    async fn test_second_account_with_same_email_is_conflict() {
        let (read_model, projection, ctx) = setup();
        projection.process_event(&ctx, &register(Uuid::new_v4(), "a@x.com")).await.unwrap();

        let err = projection
            .process_event(&ctx, &register(Uuid::new_v4(), "a@x.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProjectionError::Conflict(_)));
        assert!(!err.is_transient());
        assert_eq!(read_model.len().await, 1);
    }

    #[tokio::test]
    async fn test_change_email_moves_row() {
        let (read_model, projection, ctx) = setup();
        let id = Uuid::new_v4();
        projection.process_event(&ctx, &register(id, "a@x.com")).await.unwrap();

        let change = AccountEvent::ChangeEmail(ChangeEmail { id, email: Email::parse("b@x.com").unwrap() })
            .into_envelope(id, 2)
            .unwrap();
        projection.process_event(&ctx, &change).await.unwrap();

        assert!(read_model.get_by_email(&ctx, "a@x.com").await.is_err());
        assert_eq!(read_model.get_by_email(&ctx, "b@x.com").await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_password_events_update_hash() {
        let (read_model, projection, ctx) = setup();
        let id = Uuid::new_v4();
        projection.process_event(&ctx, &register(id, "a@x.com")).await.unwrap();

        let change = AccountEvent::ChangePassword(ChangePassword {
            id,
            password: PasswordHash::hash_with_cost("Second2#", TEST_COST).unwrap(),
        })
        .into_envelope(id, 2)
        .unwrap();
        projection.process_event(&ctx, &change).await.unwrap();
        assert!(read_model.get_by_id(&ctx, id).await.unwrap().password_hash.verify("Second2#"));

        let restore = AccountEvent::RestorePassword(RestorePassword {
            id,
            password: PasswordHash::hash_with_cost("Third3$", TEST_COST).unwrap(),
        })
        .into_envelope(id, 3)
        .unwrap();
        projection.process_event(&ctx, &restore).await.unwrap();
        assert!(read_model.get_by_id(&ctx, id).await.unwrap().password_hash.verify("Third3$"));
    }

    #[tokio::test]
    async fn test_update_without_row_is_permanent_failure() {
        let (_, projection, ctx) = setup();
        let id = Uuid::new_v4();
        let change = AccountEvent::ChangeEmail(ChangeEmail { id, email: Email::parse("b@x.com").unwrap() })
            .into_envelope(id, 2)
            .unwrap();

        let err = projection.process_event(&ctx, &change).await.unwrap_err();
        assert!(matches!(err, ProjectionError::MissingRow(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_unknown_and_corrupt_events() {
        let (read_model, projection, ctx) = setup();
        let id = Uuid::new_v4();

        let unknown = EventEnvelope::new(id, 1, "SendEmail", "{}".to_string());
        projection.process_event(&ctx, &unknown).await.unwrap();
        assert!(read_model.is_empty().await);

        let corrupt = EventEnvelope::new(id, 1, "RegisterAccount", "not json".to_string());
        let err = projection.process_event(&ctx, &corrupt).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Decode { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
