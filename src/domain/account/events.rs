use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_sourcing::core::{DomainEvent, EventEnvelope};
use super::errors::AccountError;
use super::value_objects::{DeviceToken, Email, IsMentor, PasswordHash};

// ============================================================================
// Account Domain Events
// ============================================================================
//
// Wire format: the envelope's `event_type` carries the discriminator and
// `data` carries the payload struct below as plain JSON.
//
// ============================================================================

/// Closed set of event kinds. Adding a variant forces every match to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountEventType {
    RegisterAccount,
    ChangeEmail,
    ChangePassword,
    RestorePassword,
}

impl AccountEventType {
    pub const ALL: [AccountEventType; 4] = [
        AccountEventType::RegisterAccount,
        AccountEventType::ChangeEmail,
        AccountEventType::ChangePassword,
        AccountEventType::RestorePassword,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountEventType::RegisterAccount => "RegisterAccount",
            AccountEventType::ChangeEmail => "ChangeEmail",
            AccountEventType::ChangePassword => "ChangePassword",
            AccountEventType::RestorePassword => "RestorePassword",
        }
    }

    /// `None` for a discriminator this build does not know.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

/// Union type for all account events
#[derive(Debug, Clone, PartialEq)]
pub enum AccountEvent {
    RegisterAccount(RegisterAccount),
    ChangeEmail(ChangeEmail),
    ChangePassword(ChangePassword),
    RestorePassword(RestorePassword),
}

impl AccountEvent {
    pub fn kind(&self) -> AccountEventType {
        match self {
            AccountEvent::RegisterAccount(_) => AccountEventType::RegisterAccount,
            AccountEvent::ChangeEmail(_) => AccountEventType::ChangeEmail,
            AccountEvent::ChangePassword(_) => AccountEventType::ChangePassword,
            AccountEvent::RestorePassword(_) => AccountEventType::RestorePassword,
        }
    }

    /// Decode a stored envelope. `Ok(None)` means the discriminator is
    /// unknown; a known discriminator with a bad payload is an error.
    pub fn decode(envelope: &EventEnvelope) -> Result<Option<Self>, AccountError> {
        let Some(kind) = AccountEventType::parse(&envelope.event_type) else {
            return Ok(None);
        };

        let decode_err = |source: serde_json::Error| AccountError::EventDecode {
            event_type: envelope.event_type.clone(),
            aggregate_id: envelope.aggregate_id,
            source,
        };

        let event = match kind {
            AccountEventType::RegisterAccount => {
                AccountEvent::RegisterAccount(envelope.decode().map_err(decode_err)?)
            }
            AccountEventType::ChangeEmail => {
                AccountEvent::ChangeEmail(envelope.decode().map_err(decode_err)?)
            }
            AccountEventType::ChangePassword => {
                AccountEvent::ChangePassword(envelope.decode().map_err(decode_err)?)
            }
            AccountEventType::RestorePassword => {
                AccountEvent::RestorePassword(envelope.decode().map_err(decode_err)?)
            }
        };
        Ok(Some(event))
    }

    /// Wrap as the next event of `aggregate_id`'s stream.
    pub fn into_envelope(
        &self,
        aggregate_id: Uuid,
        aggregate_version: i64,
    ) -> Result<EventEnvelope, AccountError> {
        EventEnvelope::from_event(aggregate_id, aggregate_version, self)
            .map_err(AccountError::EventEncode)
    }
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    fn payload(&self) -> Result<String, serde_json::Error> {
        match self {
            AccountEvent::RegisterAccount(e) => serde_json::to_string(e),
            AccountEvent::ChangeEmail(e) => serde_json::to_string(e),
            AccountEvent::ChangePassword(e) => serde_json::to_string(e),
            AccountEvent::RestorePassword(e) => serde_json::to_string(e),
        }
    }
}

// Individual event payloads

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterAccount {
    pub id: Uuid,
    pub email: Email,
    pub password: PasswordHash,
    pub is_mentor: IsMentor,
    #[serde(default)]
    pub device_token: DeviceToken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEmail {
    pub id: Uuid,
    pub email: Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePassword {
    pub id: Uuid,
    pub password: PasswordHash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorePassword {
    pub id: Uuid,
    pub password: PasswordHash,
}
