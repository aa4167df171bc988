use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use std::time::Duration;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::domain::account::{
    AccountCommand, AccountCommandHandlers, AccountError, AccountReadModel, AccountRecord, DeviceToken,
    Email, IsMentor, PasswordHash, ReadModelError,
};
use crate::error::{ErrorKind, HasErrorKind};
use crate::token::{RevocationReport, TokenError, TokenPair, TokenService, TokenSubject};

use super::collaborators::{generate_numeric_code, CollaboratorError, MailSender, OtpRepository};

// ============================================================================
// Auth Service - sign-up, login, logout, password restore
// ============================================================================
//
// Composes the account command handlers, the read model and the token
// service. bcrypt work runs on the blocking pool.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired restore code")]
    InvalidCode,

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Password worker failed: {0}")]
    Internal(String),
}

impl From<ReadModelError> for AuthError {
    fn from(err: ReadModelError) -> Self {
        AuthError::Account(err.into())
    }
}

impl HasErrorKind for AuthError {
    fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidCredentials | AuthError::InvalidCode => ErrorKind::Unauthorized,
            AuthError::Account(e) => e.kind(),
            AuthError::Token(e) => e.kind(),
            AuthError::Collaborator(e) => e.kind(),
            AuthError::Internal(_) => ErrorKind::Infrastructure,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub bcrypt_cost: u32,
    pub otp_length: usize,
    pub otp_ttl: Duration,
    /// Wrong guesses after which a restore code is discarded
    pub otp_max_attempts: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: bcrypt::DEFAULT_COST,
            otp_length: 6,
            otp_ttl: Duration::from_secs(600),
            otp_max_attempts: 5,
        }
    }
}

fn codes_match(stored: &str, supplied: &str) -> bool {
    stored.as_bytes().ct_eq(supplied.as_bytes()).into()
}

#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: SecretString,
    pub is_mentor: bool,
    pub device_token: String,
    pub device_id: String,
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub account_id: Uuid,
    pub tokens: TokenPair,
}

pub struct AuthService {
    commands: Arc<AccountCommandHandlers>,
    read_model: Arc<dyn AccountReadModel>,
    tokens: Arc<TokenService>,
    otp: Arc<dyn OtpRepository>,
    mail: Arc<dyn MailSender>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(
        commands: Arc<AccountCommandHandlers>,
        read_model: Arc<dyn AccountReadModel>,
        tokens: Arc<TokenService>,
        otp: Arc<dyn OtpRepository>,
        mail: Arc<dyn MailSender>,
        config: AuthConfig,
    ) -> Self {
        Self {
            commands,
            read_model,
            tokens,
            otp,
            mail,
            config,
        }
    }

    async fn hash(&self, password: SecretString) -> Result<PasswordHash, AuthError> {
        let cost = self.config.bcrypt_cost;
        tokio::task::spawn_blocking(move || PasswordHash::hash_with_cost(password.expose_secret(), cost))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .map_err(AuthError::from)
    }

    async fn find(&self, ctx: &RequestContext, email: &str) -> Result<Option<AccountRecord>, AuthError> {
        match self.read_model.get_by_email(ctx, email).await {
            Ok(record) => Ok(Some(record)),
            Err(ReadModelError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Registers the account and returns a token pair for the first device.
    /// Claims come from the request since the read model may not have the
    /// account yet.
    pub async fn sign_up(&self, ctx: &RequestContext, request: SignUp) -> Result<SignUpOutcome, AuthError> {
        let email = Email::parse(&request.email)?;
        let password = self.hash(request.password).await?;
        let account_id = Uuid::new_v4();

        self.commands
            .dispatch(
                ctx,
                AccountCommand::CreateAccount {
                    aggregate_id: account_id,
                    email: email.clone(),
                    password,
                    is_mentor: IsMentor(request.is_mentor),
                    device_token: DeviceToken::new(request.device_token),
                },
            )
            .await?;

        let subject = TokenSubject {
            email: email.to_string(),
            subject_id: account_id,
            device_id: request.device_id,
            is_mentor: request.is_mentor,
        };
        let tokens = self.tokens.issue_pair(ctx, &subject).await?;

        tracing::info!(account_id = %account_id, email = %email, "👤 Account signed up");
        Ok(SignUpOutcome { account_id, tokens })
    }

    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: SecretString,
        device_id: &str,
    ) -> Result<TokenPair, AuthError> {
        let Some(record) = self.find(ctx, email).await? else {
            tracing::debug!(email = %email, "Login for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !record.password_hash.verify_blocking(password).await? {
            tracing::warn!(account_id = %record.id, "Login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let subject = TokenSubject {
            email: record.email.to_string(),
            subject_id: record.id,
            device_id: device_id.to_string(),
            is_mentor: record.is_mentor.get(),
        };
        Ok(self.tokens.issue_pair(ctx, &subject).await?)
    }

    pub async fn logout(
        &self,
        ctx: &RequestContext,
        email: &str,
        device_id: &str,
    ) -> Result<RevocationReport, AuthError> {
        Ok(self.tokens.revoke(ctx, email, device_id).await?)
    }

    pub async fn logout_all(&self, ctx: &RequestContext, email: &str) -> Result<RevocationReport, AuthError> {
        Ok(self.tokens.revoke_all(ctx, email).await?)
    }

    pub async fn change_password(
        &self,
        ctx: &RequestContext,
        account_id: Uuid,
        old_password: SecretString,
        new_password: SecretString,
    ) -> Result<(), AuthError> {
        let new_password = self.hash(new_password).await?;
        self.commands
            .dispatch(
                ctx,
                AccountCommand::ChangePassword {
                    aggregate_id: account_id,
                    old_password,
                    new_password,
                },
            )
            .await?;
        Ok(())
    }

    /// Requires the current password, checked against the stored hash.
    pub async fn change_email(
        &self,
        ctx: &RequestContext,
        account_id: Uuid,
        new_email: &str,
        password: SecretString,
    ) -> Result<(), AuthError> {
        let new_email = Email::parse(new_email)?;
        self.commands
            .dispatch(
                ctx,
                AccountCommand::ChangeEmail {
                    aggregate_id: account_id,
                    new_email,
                    password,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn send_restore_code(&self, ctx: &RequestContext, email: &str) -> Result<(), AuthError> {
        if self.find(ctx, email).await?.is_none() {
            return Err(AccountError::NotFound(email.to_string()).into());
        }

        let code = generate_numeric_code(self.config.otp_length);
        self.otp.save_code(ctx, email, &code, self.config.otp_ttl).await?;
        self.mail
            .send(
                ctx,
                email,
                "Password restore",
                &format!(
                    "Your password restore code is {code}. It expires in {} minutes.",
                    self.config.otp_ttl.as_secs() / 60
                ),
            )
            .await?;

        tracing::info!(email = %email, "Restore code sent");
        Ok(())
    }

    pub async fn restore_password(
        &self,
        ctx: &RequestContext,
        email: &str,
        code: &str,
        new_password: SecretString,
    ) -> Result<(), AuthError> {
        let Some(stored) = self.otp.get_code(ctx, email).await? else {
            return Err(AuthError::InvalidCode);
        };

        if !codes_match(&stored, code) {
            let failures = self.otp.record_failed_attempt(ctx, email).await?;
            if failures >= self.config.otp_max_attempts {
                tracing::warn!(email = %email, failures, "🔒 Restore code discarded after too many attempts");
                self.otp.delete_code(ctx, email).await?;
            }
            return Err(AuthError::InvalidCode);
        }

        let record = self
            .find(ctx, email)
            .await?
            .ok_or_else(|| AccountError::NotFound(email.to_string()))?;
        let password = self.hash(new_password).await?;

        self.commands
            .dispatch(
                ctx,
                AccountCommand::RestorePassword {
                    aggregate_id: record.id,
                    password,
                },
            )
            .await?;

        // single use, but only spent once the restore is stored
        self.otp.delete_code(ctx, email).await?;

        tracing::info!(account_id = %record.id, "Password restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_exact_only() {
        assert!(codes_match("123456", "123456"));
        assert!(!codes_match("123456", "123457"));
        assert!(!codes_match("123456", "12345"));
        assert!(!codes_match("123456", ""));
    }
}
