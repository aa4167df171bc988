use secrecy::SecretString;
use uuid::Uuid;

use super::value_objects::{DeviceToken, Email, IsMentor, PasswordHash};

// ============================================================================
// Account Domain Commands
// ============================================================================

#[derive(Debug, Clone)]
pub enum AccountCommand {
    CreateAccount {
        aggregate_id: Uuid,
        email: Email,
        password: PasswordHash,
        is_mentor: IsMentor,
        device_token: DeviceToken,
    },
    ChangePassword {
        aggregate_id: Uuid,
        /// Checked against the stored hash before the change is accepted
        old_password: SecretString,
        new_password: PasswordHash,
    },
    ChangeEmail {
        aggregate_id: Uuid,
        new_email: Email,
        /// Current password, checked against the stored hash
        password: SecretString,
    },
    RestorePassword {
        aggregate_id: Uuid,
        password: PasswordHash,
    },
}

impl AccountCommand {
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            AccountCommand::CreateAccount { aggregate_id, .. }
            | AccountCommand::ChangePassword { aggregate_id, .. }
            | AccountCommand::ChangeEmail { aggregate_id, .. }
            | AccountCommand::RestorePassword { aggregate_id, .. } => *aggregate_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccountCommand::CreateAccount { .. } => "CreateAccount",
            AccountCommand::ChangePassword { .. } => "ChangePassword",
            AccountCommand::ChangeEmail { .. } => "ChangeEmail",
            AccountCommand::RestorePassword { .. } => "RestorePassword",
        }
    }
}
