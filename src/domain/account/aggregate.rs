use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, EventEnvelope, NO_EVENTS_VERSION};
use super::errors::AccountError;
use super::events::AccountEvent;
use super::value_objects::{DeviceToken, Email, IsMentor, PasswordHash};

// ============================================================================
// Account Aggregate
// ============================================================================
//
// Every field is written only by `apply`. Handlers overwrite unconditionally
// and never consult earlier state, so replay is deterministic.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AccountAggregate {
    pub id: Uuid,
    pub version: i64,
    pub email: Option<Email>,
    pub password: Option<PasswordHash>,
    pub is_mentor: IsMentor,
    pub device_token: DeviceToken,
}

impl AccountAggregate {
    /// Empty shell bound to an id, ready for replay.
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            version: NO_EVENTS_VERSION,
            email: None,
            password: None,
            is_mentor: IsMentor::default(),
            device_token: DeviceToken::default(),
        }
    }

    /// Fully populated state for a first creation, before anything is stored.
    pub fn new(
        id: Uuid,
        email: Email,
        password: PasswordHash,
        is_mentor: IsMentor,
        device_token: DeviceToken,
    ) -> Self {
        Self {
            id,
            version: NO_EVENTS_VERSION,
            email: Some(email),
            password: Some(password),
            is_mentor,
            device_token,
        }
    }

    /// True once at least one event has been applied.
    pub fn exists(&self) -> bool {
        self.version > 0
    }

    pub fn stream_name(&self) -> String {
        stream_name(self.id)
    }

    fn bump_version(&mut self) {
        self.version = self.version.max(0) + 1;
    }
}

/// Name of the per-account stream.
pub fn stream_name(id: Uuid) -> String {
    format!("account-{id}")
}

impl Aggregate for AccountAggregate {
    type Error = AccountError;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &EventEnvelope) -> Result<(), Self::Error> {
        match AccountEvent::decode(event)? {
            Some(AccountEvent::RegisterAccount(e)) => {
                self.email = Some(e.email);
                self.password = Some(e.password);
                self.is_mentor = e.is_mentor;
                self.device_token = e.device_token;
            }
            Some(AccountEvent::ChangeEmail(e)) => {
                self.email = Some(e.email);
            }
            Some(AccountEvent::ChangePassword(e)) => {
                self.password = Some(e.password);
            }
            Some(AccountEvent::RestorePassword(e)) => {
                self.password = Some(e.password);
            }
            None => {
                tracing::warn!(
                    aggregate_id = %self.id,
                    event_type = %event.event_type,
                    "Skipping unknown event type during replay"
                );
            }
        }

        self.bump_version();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::events::{ChangeEmail, ChangePassword, RegisterAccount, RestorePassword};

    const TEST_COST: u32 = 4;

    fn register(id: Uuid, email: &str) -> EventEnvelope {
        AccountEvent::RegisterAccount(RegisterAccount {
            id,
            email: Email::parse(email).unwrap(),
            password: PasswordHash::hash_with_cost("Valid1@", TEST_COST).unwrap(),
            is_mentor: IsMentor(true),
            device_token: DeviceToken::new("push-1"),
        })
        .into_envelope(id, 1)
        .unwrap()
    }

    fn change_email(id: Uuid, email: &str, version: i64) -> EventEnvelope {
        AccountEvent::ChangeEmail(ChangeEmail { id, email: Email::parse(email).unwrap() })
            .into_envelope(id, version)
            .unwrap()
    }

    fn change_password(id: Uuid, password: &str, version: i64) -> EventEnvelope {
        AccountEvent::ChangePassword(ChangePassword {
            id,
            password: PasswordHash::hash_with_cost(password, TEST_COST).unwrap(),
        })
        .into_envelope(id, version)
        .unwrap()
    }

    #[test]
    fn test_shell_starts_at_sentinel_version() {
        let account = AccountAggregate::with_id(Uuid::new_v4());
        assert_eq!(account.version, NO_EVENTS_VERSION);
        assert!(!account.exists());
        assert!(account.email.is_none());
    }

    #[test]
    fn test_version_equals_number_of_events() {
        let id = Uuid::new_v4();
        let events = vec![
            register(id, "a@x.com"),
            change_email(id, "b@x.com", 2),
            change_password(id, "Second2#", 3),
        ];

        let mut account = AccountAggregate::with_id(id);
        let applied = account.replay(&events).unwrap();

        assert_eq!(applied, 3);
        assert_eq!(account.version, 3);
        assert_eq!(account.email.as_ref().map(Email::as_str), Some("b@x.com"));
        assert!(account.password.as_ref().unwrap().verify("Second2#"));
        assert_eq!(account.is_mentor, IsMentor(true));
        assert_eq!(account.device_token.as_str(), "push-1");
    }

    #[test]
    fn test_replay_matches_incremental_apply() {
        let id = Uuid::new_v4();
        let events = vec![
            register(id, "a@x.com"),
            change_email(id, "b@x.com", 2),
            change_email(id, "c@x.com", 3),
        ];

        let mut replayed = AccountAggregate::with_id(id);
        replayed.replay(&events).unwrap();

        let mut incremental = AccountAggregate::with_id(id);
        for event in &events {
            incremental.apply(event).unwrap();
        }

        let mut again = AccountAggregate::with_id(id);
        again.replay(&events).unwrap();

        assert_eq!(replayed, incremental);
        assert_eq!(replayed, again);
    }

    #[test]
    fn test_restore_password_sets_hash() {
        let id = Uuid::new_v4();
        let restore = AccountEvent::RestorePassword(RestorePassword {
            id,
            password: PasswordHash::hash_with_cost("Restored1!", TEST_COST).unwrap(),
        })
        .into_envelope(id, 2)
        .unwrap();

        let mut account = AccountAggregate::with_id(id);
        account.replay(&[register(id, "a@x.com"), restore]).unwrap();

        assert!(account.password.unwrap().verify("Restored1!"));
    }

    #[test]
    fn test_unknown_event_is_skipped_but_counted() {
        let id = Uuid::new_v4();
        let unknown = EventEnvelope::new(id, 2, "SendEmail", r#"{"subject":"hi"}"#.to_string());

        let mut account = AccountAggregate::with_id(id);
        account.replay(&[register(id, "a@x.com"), unknown]).unwrap();

        assert_eq!(account.version, 2);
        assert_eq!(account.email.as_ref().map(Email::as_str), Some("a@x.com"));
    }

    #[test]
    fn test_bad_payload_is_an_error_not_a_panic() {
        let id = Uuid::new_v4();
        let corrupt = EventEnvelope::new(id, 1, "RegisterAccount", "{".to_string());

        let mut account = AccountAggregate::with_id(id);
        let result = account.apply(&corrupt);

        assert!(matches!(result, Err(AccountError::EventDecode { .. })));
        assert_eq!(account.version, NO_EVENTS_VERSION);
    }

    #[test]
    fn test_stream_name() {
        let id = Uuid::new_v4();
        assert_eq!(AccountAggregate::with_id(id).stream_name(), format!("account-{id}"));
    }
}
