use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::AccountError;

// ============================================================================
// Account Value Objects
// ============================================================================

const MIN_PASSWORD_LEN: usize = 6;

/// Validated email address. Rejected at construction, including when
/// deserialized from a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, AccountError> {
        let trimmed = raw.as_ref().trim();
        if is_valid_email(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(AccountError::InvalidEmail(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

impl TryFrom<String> for Email {
    type Error = AccountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Email::parse(value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// bcrypt hash of a password. The plaintext never leaves `hash_with_cost`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Check strength rules, then hash.
    pub fn hash_with_cost(plaintext: &str, cost: u32) -> Result<Self, AccountError> {
        if !is_strong_password(plaintext) {
            return Err(AccountError::WeakPassword);
        }
        let hashed = bcrypt::hash(plaintext, cost)
            .map_err(|e| AccountError::PasswordHashing(e.to_string()))?;
        Ok(Self(hashed))
    }

    pub fn hash(plaintext: &str) -> Result<Self, AccountError> {
        Self::hash_with_cost(plaintext, bcrypt::DEFAULT_COST)
    }

    /// Wrap a hash read back from storage.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Constant-time comparison of `candidate` against this hash. A
    /// malformed stored hash never matches.
    pub fn verify(&self, candidate: &str) -> bool {
        bcrypt::verify(candidate, &self.0).unwrap_or(false)
    }

    /// `verify` on the blocking pool, for callers on the async runtime.
    pub async fn verify_blocking(&self, candidate: SecretString) -> Result<bool, AccountError> {
        let hash = self.clone();
        tokio::task::spawn_blocking(move || hash.verify(candidate.expose_secret()))
            .await
            .map_err(|e| AccountError::PasswordHashing(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash([REDACTED])")
    }
}

/// At least six characters with upper, lower, digit and a special character.
pub fn is_strong_password(s: &str) -> bool {
    s.chars().count() >= MIN_PASSWORD_LEN
        && s.chars().any(|c| c.is_uppercase())
        && s.chars().any(|c| c.is_lowercase())
        && s.chars().any(|c| c.is_ascii_digit())
        && s.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace())
}

/// Mentor flag carried in tokens and the read model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IsMentor(pub bool);

impl IsMentor {
    pub fn get(self) -> bool {
        self.0
    }
}

/// Push-notification token of the registering device; may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceToken(String);

impl DeviceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
