use async_trait::async_trait;
use scylla::client::session::Session;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use super::read_model::{AccountReadModel, AccountRecord, ReadModelError};
use super::value_objects::{DeviceToken, Email, IsMentor, PasswordHash};

// ============================================================================
// ScyllaDB Account Read Model
// ============================================================================
//
// Two tables keep both lookups single-partition:
// - accounts_by_id:    full record
// - accounts_by_email: email -> id
//
// Writes check uniqueness with a read and then write both tables in one
// logged batch. The projection is the only writer and runs as one worker
// per group, so the check cannot race another insert.
//
// ============================================================================

pub const READ_MODEL_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts_by_id (
        id uuid PRIMARY KEY,
        email text,
        password_hash text,
        is_mentor boolean,
        device_token text
    )",
    "CREATE TABLE IF NOT EXISTS accounts_by_email (
        email text PRIMARY KEY,
        id uuid
    )",
];

pub async fn ensure_read_model_schema(session: &Session) -> Result<(), ReadModelError> {
    for statement in READ_MODEL_SCHEMA {
        session
            .query_unpaged(*statement, &[])
            .await
            .map_err(ReadModelError::database)?;
    }
    Ok(())
}

pub struct ScyllaAccountReadModel {
    session: Arc<Session>,
}

impl ScyllaAccountReadModel {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    async fn id_for_email(&self, email: &str) -> Result<Option<Uuid>, ReadModelError> {
        let result = self
            .session
            .query_unpaged("SELECT id FROM accounts_by_email WHERE email = ?", (email,))
            .await
            .map_err(ReadModelError::database)?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(None),
        };

        rows_result
            .maybe_first_row::<(Uuid,)>()
            .map(|row| row.map(|(id,)| id))
            .map_err(ReadModelError::database)
    }

    async fn record_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>, ReadModelError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT email, password_hash, is_mentor, device_token FROM accounts_by_id WHERE id = ?",
                (id,),
            )
            .await
            .map_err(ReadModelError::database)?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(None),
        };

        let row = rows_result
            .maybe_first_row::<(String, String, bool, Option<String>)>()
            .map_err(ReadModelError::database)?;

        match row {
            Some((email, password_hash, is_mentor, device_token)) => {
                let email =
                    Email::parse(&email).map_err(|e| ReadModelError::Corrupt(e.to_string()))?;
                Ok(Some(AccountRecord {
                    id,
                    email,
                    password_hash: PasswordHash::from_hash(password_hash),
                    is_mentor: IsMentor(is_mentor),
                    device_token: DeviceToken::new(device_token.unwrap_or_default()),
                }))
            }
            None => Ok(None),
        }
    }

    async fn write_record(
        &self,
        record: &AccountRecord,
        replaced_email: Option<&str>,
    ) -> Result<(), ReadModelError> {
        let mut batch = scylla::statement::batch::Batch::default();
        let mut values: Vec<Box<dyn scylla::serialize::row::SerializeRow + Send + Sync>> = vec![];

        if let Some(old) = replaced_email {
            if old != record.email.as_str() {
                batch.append_statement("DELETE FROM accounts_by_email WHERE email = ?");
                values.push(Box::new((old.to_string(),)));
            }
        }

        batch.append_statement("INSERT INTO accounts_by_email (email, id) VALUES (?, ?)");
        values.push(Box::new((record.email.to_string(), record.id)));

        batch.append_statement(
            "INSERT INTO accounts_by_id (id, email, password_hash, is_mentor, device_token) VALUES (?, ?, ?, ?, ?)",
        );
        values.push(Box::new((
            record.id,
            record.email.to_string(),
            record.password_hash.as_str().to_string(),
            record.is_mentor.get(),
            record.device_token.as_str().to_string(),
        )));

        self.session
            .batch(&batch, values)
            .await
            .map_err(ReadModelError::database)?;
        Ok(())
    }
}

#[async_trait]
impl AccountReadModel for ScyllaAccountReadModel {
    async fn get_by_email(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<AccountRecord, ReadModelError> {
        ctx.run(async {
            let id = self
                .id_for_email(email)
                .await?
                .ok_or_else(|| ReadModelError::NotFound(email.to_string()))?;
            self.record_by_id(id)
                .await?
                .ok_or_else(|| ReadModelError::NotFound(email.to_string()))
        })
        .await?
    }

    async fn get_by_id(&self, ctx: &RequestContext, id: Uuid) -> Result<AccountRecord, ReadModelError> {
        ctx.run(async {
            self.record_by_id(id)
                .await?
                .ok_or_else(|| ReadModelError::NotFound(id.to_string()))
        })
        .await?
    }

    async fn save(&self, ctx: &RequestContext, record: AccountRecord) -> Result<(), ReadModelError> {
        ctx.run(async {
            if self.id_for_email(record.email.as_str()).await?.is_some() {
                return Err(ReadModelError::DuplicateEmail(record.email.to_string()));
            }
            if self.record_by_id(record.id).await?.is_some() {
                return Err(ReadModelError::DuplicateId(record.id));
            }
            self.write_record(&record, None).await?;

            tracing::debug!(account_id = %record.id, "Read model row inserted");
            Ok(())
        })
        .await?
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        record: AccountRecord,
        searched_email: &str,
    ) -> Result<(), ReadModelError> {
        ctx.run(async {
            let existing_id = self
                .id_for_email(searched_email)
                .await?
                .ok_or_else(|| ReadModelError::NotFound(searched_email.to_string()))?;

            if record.email.as_str() != searched_email {
                if let Some(owner) = self.id_for_email(record.email.as_str()).await? {
                    if owner != existing_id {
                        return Err(ReadModelError::DuplicateEmail(record.email.to_string()));
                    }
                }
            }

            self.write_record(&record, Some(searched_email)).await?;

            tracing::debug!(account_id = %record.id, "Read model row updated");
            Ok(())
        })
        .await?
    }
}
