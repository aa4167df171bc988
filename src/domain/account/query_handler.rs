use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::token::{TokenRepository, TokenStoreError};

use super::errors::AccountError;
use super::read_model::{AccountReadModel, AccountRecord, ReadModelError};

// ============================================================================
// Account Queries
// ============================================================================
//
// Served from the read model only. A miss is NotFound even if the account
// exists in the event log and the projection has not caught up yet.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AccountQuery {
    GetByEmail(String),
    GetById(Uuid),
}

/// Public projection of an account; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountView {
    pub id: Uuid,
    pub email: String,
    pub is_mentor: bool,
    pub device_token: String,
}

impl From<AccountRecord> for AccountView {
    fn from(record: AccountRecord) -> Self {
        Self {
            id: record.id,
            email: record.email.to_string(),
            is_mentor: record.is_mentor.get(),
            device_token: record.device_token.as_str().to_string(),
        }
    }
}

pub struct AccountQueryHandler {
    read_model: Arc<dyn AccountReadModel>,
}

impl AccountQueryHandler {
    pub fn new(read_model: Arc<dyn AccountReadModel>) -> Self {
        Self { read_model }
    }

    pub async fn handle(&self, ctx: &RequestContext, query: AccountQuery) -> Result<AccountView, AccountError> {
        let result = match &query {
            AccountQuery::GetByEmail(email) => self.read_model.get_by_email(ctx, email).await,
            AccountQuery::GetById(id) => self.read_model.get_by_id(ctx, *id).await,
        };

        match result {
            Ok(record) => Ok(record.into()),
            Err(ReadModelError::NotFound(key)) => {
                tracing::debug!(query = ?query, "Account not in read model");
                Err(AccountError::NotFound(key))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Lists the devices a subject currently holds refresh tokens for.
pub struct DeviceQueryHandler {
    tokens: Arc<dyn TokenRepository>,
}

impl DeviceQueryHandler {
    pub fn new(tokens: Arc<dyn TokenRepository>) -> Self {
        Self { tokens }
    }

    pub async fn device_ids(&self, ctx: &RequestContext, email: &str) -> Result<Vec<String>, TokenStoreError> {
        let mut ids = self.tokens.device_ids(ctx, email).await?;
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
