use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::event_sourcing::core::{Aggregate, EventEnvelope};
use crate::event_sourcing::store::AggregateStore;
use crate::metrics::Metrics;

use super::aggregate::AccountAggregate;
use super::commands::AccountCommand;
use super::email_registry::{Claim, EmailRegistry};
use super::errors::AccountError;
use super::events::{AccountEvent, ChangeEmail, ChangePassword, RegisterAccount, RestorePassword};
use super::read_model::{AccountReadModel, ReadModelError};
use super::value_objects::Email;

// ============================================================================
// Account Command Handlers
// ============================================================================
//
// Orchestrates: Command → hydrate Aggregate → derive Event → append
//
// One handler per mutation. The read model is not written here; it catches
// up when the projection processes the appended event. Email uniqueness is
// enforced before the append through the `EmailRegistry` claim.
//
// ============================================================================

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Returns the persisted event.
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: Option<AccountCommand>,
    ) -> Result<EventEnvelope, AccountError>;
}

fn require_command(command: Option<AccountCommand>) -> Result<AccountCommand, AccountError> {
    command.ok_or_else(|| AccountError::InvalidArgument("received nil command".to_string()))
}

fn wrong_variant(expected: &str, got: &AccountCommand) -> AccountError {
    AccountError::InvalidArgument(format!(
        "invalid command type: expected {expected}, got {}",
        got.name()
    ))
}

/// Upper bound for undoing a claim after the request itself failed.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared dependencies of all four handlers.
#[derive(Clone)]
pub struct HandlerDeps {
    pub aggregate_store: AggregateStore,
    pub read_model: Arc<dyn AccountReadModel>,
    pub emails: Arc<dyn EmailRegistry>,
    pub metrics: Option<Arc<Metrics>>,
}

impl HandlerDeps {
    pub fn new(
        aggregate_store: AggregateStore,
        read_model: Arc<dyn AccountReadModel>,
        emails: Arc<dyn EmailRegistry>,
    ) -> Self {
        Self {
            aggregate_store,
            read_model,
            emails,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn hydrate(
        &self,
        ctx: &RequestContext,
        aggregate: &mut AccountAggregate,
    ) -> Result<(), AccountError> {
        self.aggregate_store.load_and_apply(ctx, aggregate).await?;
        Ok(())
    }

    async fn hydrate_existing(
        &self,
        ctx: &RequestContext,
        aggregate: &mut AccountAggregate,
    ) -> Result<(), AccountError> {
        self.hydrate(ctx, aggregate).await?;
        if !aggregate.exists() {
            return Err(AccountError::NotFound(aggregate.id.to_string()));
        }
        Ok(())
    }

    async fn persist(
        &self,
        ctx: &RequestContext,
        aggregate: &AccountAggregate,
        event: AccountEvent,
    ) -> Result<EventEnvelope, AccountError> {
        let envelope = event.into_envelope(aggregate.id, aggregate.stream_length() + 1)?;
        let stored = self.aggregate_store.save(ctx, aggregate, envelope).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_event_appended(&stored.event_type);
        }

        tracing::info!(
            aggregate_id = %stored.aggregate_id,
            stream = %aggregate.stream_name(),
            event_type = %stored.event_type,
            version = stored.aggregate_version,
            "✅ Account event persisted"
        );
        Ok(stored)
    }

    fn record_outcome(&self, command: &'static str, result: &Result<EventEnvelope, AccountError>) {
        if let Some(metrics) = &self.metrics {
            metrics.record_command(command, result.is_ok());
        }
    }

    /// True when the read model already maps `email` to an account other
    /// than `except`.
    async fn email_taken(
        &self,
        ctx: &RequestContext,
        email: &str,
        except: Option<Uuid>,
    ) -> Result<bool, AccountError> {
        match self.read_model.get_by_email(ctx, email).await {
            Ok(record) => Ok(Some(record.id) != except),
            Err(ReadModelError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_email(&self, ctx: &RequestContext, email: &Email, account_id: Uuid) -> Result<(), AccountError> {
        match self.emails.claim(ctx, email.as_str(), account_id).await? {
            Claim::Granted => Ok(()),
            Claim::HeldBy(owner) => {
                tracing::warn!(email = %email, owner = %owner, "Email already claimed by another account");
                Err(AccountError::EmailTaken(email.to_string()))
            }
        }
    }

    /// Drop a claim on `email` unless the stream of `account_id` now holds
    /// it. Runs on its own context so a cancelled request still cleans up.
    async fn release_email(&self, email: &Email, account_id: Uuid) {
        let ctx = RequestContext::with_timeout(RELEASE_TIMEOUT);

        let mut current = AccountAggregate::with_id(account_id);
        match self.aggregate_store.load_and_apply(&ctx, &mut current).await {
            Ok(_) if current.email.as_ref() == Some(email) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(email = %email, account_id = %account_id, error = %e, "Keeping email claim, stream unreadable");
                return;
            }
        }

        if let Err(e) = self.emails.release(&ctx, email.as_str(), account_id).await {
            tracing::warn!(email = %email, account_id = %account_id, error = %e, "Failed to release email claim");
        }
    }

    /// Check `password` against the hydrated hash off the async runtime.
    async fn check_password(
        &self,
        aggregate: &AccountAggregate,
        password: SecretString,
    ) -> Result<(), AccountError> {
        let matches = match aggregate.password.as_ref() {
            Some(stored) => stored.verify_blocking(password).await?,
            None => false,
        };
        if !matches {
            tracing::warn!(aggregate_id = %aggregate.id, "Password does not match stored hash");
            return Err(AccountError::InvalidCredentials);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Create
// ----------------------------------------------------------------------------

pub struct CreateAccountHandler {
    deps: HandlerDeps,
}

impl CreateAccountHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, ctx: &RequestContext, command: AccountCommand) -> Result<EventEnvelope, AccountError> {
        let AccountCommand::CreateAccount { aggregate_id, email, password, is_mentor, device_token } = command
        else {
            return Err(wrong_variant("CreateAccount", &command));
        };

        let mut aggregate = AccountAggregate::with_id(aggregate_id);
        self.deps.hydrate(ctx, &mut aggregate).await?;
        if aggregate.exists() {
            return Err(AccountError::AlreadyExists(aggregate_id));
        }

        if self.deps.email_taken(ctx, email.as_str(), None).await? {
            return Err(AccountError::EmailTaken(email.to_string()));
        }
        self.deps.claim_email(ctx, &email, aggregate_id).await?;

        let event = AccountEvent::RegisterAccount(RegisterAccount {
            id: aggregate_id,
            email: email.clone(),
            password,
            is_mentor,
            device_token,
        });
        let result = self.deps.persist(ctx, &aggregate, event).await;
        if result.is_err() {
            self.deps.release_email(&email, aggregate_id).await;
        }
        result
    }
}

#[async_trait]
impl CommandHandler for CreateAccountHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: Option<AccountCommand>,
    ) -> Result<EventEnvelope, AccountError> {
        let command = require_command(command)?;
        let result = self.run(ctx, command).await;
        self.deps.record_outcome("CreateAccount", &result);
        result
    }
}

// ----------------------------------------------------------------------------
// Change password
// ----------------------------------------------------------------------------

pub struct ChangePasswordHandler {
    deps: HandlerDeps,
}

impl ChangePasswordHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, ctx: &RequestContext, command: AccountCommand) -> Result<EventEnvelope, AccountError> {
        let AccountCommand::ChangePassword { aggregate_id, old_password, new_password } = command else {
            return Err(wrong_variant("ChangePassword", &command));
        };

        let mut aggregate = AccountAggregate::with_id(aggregate_id);
        self.deps.hydrate_existing(ctx, &mut aggregate).await?;

        self.deps.check_password(&aggregate, old_password).await?;

        let event = AccountEvent::ChangePassword(ChangePassword {
            id: aggregate_id,
            password: new_password,
        });
        self.deps.persist(ctx, &aggregate, event).await
    }
}

#[async_trait]
impl CommandHandler for ChangePasswordHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: Option<AccountCommand>,
    ) -> Result<EventEnvelope, AccountError> {
        let command = require_command(command)?;
        let result = self.run(ctx, command).await;
        self.deps.record_outcome("ChangePassword", &result);
        result
    }
}

// ----------------------------------------------------------------------------
// Change email
// ----------------------------------------------------------------------------

pub struct ChangeEmailHandler {
    deps: HandlerDeps,
}

impl ChangeEmailHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, ctx: &RequestContext, command: AccountCommand) -> Result<EventEnvelope, AccountError> {
        let AccountCommand::ChangeEmail { aggregate_id, new_email, password } = command else {
            return Err(wrong_variant("ChangeEmail", &command));
        };

        let mut aggregate = AccountAggregate::with_id(aggregate_id);
        self.deps.hydrate_existing(ctx, &mut aggregate).await?;
        self.deps.check_password(&aggregate, password).await?;

        if self
            .deps
            .email_taken(ctx, new_email.as_str(), Some(aggregate_id))
            .await?
        {
            return Err(AccountError::EmailTaken(new_email.to_string()));
        }
        self.deps.claim_email(ctx, &new_email, aggregate_id).await?;

        let previous = aggregate.email.clone();
        let event = AccountEvent::ChangeEmail(ChangeEmail {
            id: aggregate_id,
            email: new_email.clone(),
        });
        let result = self.deps.persist(ctx, &aggregate, event).await;

        match (&result, previous) {
            (Err(_), _) => self.deps.release_email(&new_email, aggregate_id).await,
            (Ok(_), Some(old)) if old != new_email => self.deps.release_email(&old, aggregate_id).await,
            _ => {}
        }
        result
    }
}

#[async_trait]
impl CommandHandler for ChangeEmailHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: Option<AccountCommand>,
    ) -> Result<EventEnvelope, AccountError> {
        let command = require_command(command)?;
        let result = self.run(ctx, command).await;
        self.deps.record_outcome("ChangeEmail", &result);
        result
    }
}

// ----------------------------------------------------------------------------
// Restore password
// ----------------------------------------------------------------------------

pub struct RestorePasswordHandler {
    deps: HandlerDeps,
}

impl RestorePasswordHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, ctx: &RequestContext, command: AccountCommand) -> Result<EventEnvelope, AccountError> {
        let AccountCommand::RestorePassword { aggregate_id, password } = command else {
            return Err(wrong_variant("RestorePassword", &command));
        };

        let mut aggregate = AccountAggregate::with_id(aggregate_id);
        self.deps.hydrate_existing(ctx, &mut aggregate).await?;

        let event = AccountEvent::RestorePassword(RestorePassword {
            id: aggregate_id,
            password,
        });
        self.deps.persist(ctx, &aggregate, event).await
    }
}

#[async_trait]
impl CommandHandler for RestorePasswordHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        command: Option<AccountCommand>,
    ) -> Result<EventEnvelope, AccountError> {
        let command = require_command(command)?;
        let result = self.run(ctx, command).await;
        self.deps.record_outcome("RestorePassword", &result);
        result
    }
}

/// The four handlers wired to the same dependencies.
pub struct AccountCommandHandlers {
    pub create: CreateAccountHandler,
    pub change_password: ChangePasswordHandler,
    pub change_email: ChangeEmailHandler,
    pub restore_password: RestorePasswordHandler,
}

impl AccountCommandHandlers {
    pub fn new(deps: HandlerDeps) -> Self {
        Self {
            create: CreateAccountHandler::new(deps.clone()),
            change_password: ChangePasswordHandler::new(deps.clone()),
            change_email: ChangeEmailHandler::new(deps.clone()),
            restore_password: RestorePasswordHandler::new(deps),
        }
    }

    /// Route a command to the handler for its variant.
    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        command: AccountCommand,
    ) -> Result<EventEnvelope, AccountError> {
        match &command {
            AccountCommand::CreateAccount { .. } => self.create.handle(ctx, Some(command)).await,
            AccountCommand::ChangePassword { .. } => {
                self.change_password.handle(ctx, Some(command)).await
            }
            AccountCommand::ChangeEmail { .. } => self.change_email.handle(ctx, Some(command)).await,
            AccountCommand::RestorePassword { .. } => {
                self.restore_password.handle(ctx, Some(command)).await
            }
        }
    }
}
