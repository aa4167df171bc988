use async_trait::async_trait;
use scylla::client::session::Session;
use scylla::value::{CqlValue, Row};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::context::RequestContext;
use super::read_model::ReadModelError;

// ============================================================================
// Email Registry - synchronous uniqueness for the command side
// ============================================================================
//
// The read model only learns about an email once the projection catches up,
// so command handlers claim the address here before appending. A claim is
// keyed by the normalized email and owned by one account id; claiming an
// address the same account already owns succeeds again.
//
// The Scylla table is written with lightweight transactions (Paxos), so two
// concurrent claims for one address cannot both win.
//
// ============================================================================

pub const EMAIL_REGISTRY_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS account_email_claims (
    email text PRIMARY KEY,
    account_id uuid,
    claimed_at timestamp
)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Granted,
    HeldBy(Uuid),
}

#[async_trait]
pub trait EmailRegistry: Send + Sync {
    async fn claim(&self, ctx: &RequestContext, email: &str, account_id: Uuid) -> Result<Claim, ReadModelError>;

    /// Drop the claim if `account_id` still owns it.
    async fn release(&self, ctx: &RequestContext, email: &str, account_id: Uuid) -> Result<(), ReadModelError>;
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryEmailRegistry {
    claims: RwLock<HashMap<String, Uuid>>,
}

impl InMemoryEmailRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn owner(&self, email: &str) -> Option<Uuid> {
        self.claims.read().await.get(email).copied()
    }
}

#[async_trait]
impl EmailRegistry for InMemoryEmailRegistry {
    async fn claim(&self, ctx: &RequestContext, email: &str, account_id: Uuid) -> Result<Claim, ReadModelError> {
        ctx.check()?;
        match self.claims.write().await.entry(email.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(account_id);
                Ok(Claim::Granted)
            }
            Entry::Occupied(slot) if *slot.get() == account_id => Ok(Claim::Granted),
            Entry::Occupied(slot) => Ok(Claim::HeldBy(*slot.get())),
        }
    }

    async fn release(&self, ctx: &RequestContext, email: &str, account_id: Uuid) -> Result<(), ReadModelError> {
        ctx.check()?;
        let mut claims = self.claims.write().await;
        if claims.get(email) == Some(&account_id) {
            claims.remove(email);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// ScyllaDB
// ----------------------------------------------------------------------------

pub struct ScyllaEmailRegistry {
    session: Arc<Session>,
}

impl ScyllaEmailRegistry {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn ensure_schema(session: &Session) -> Result<(), ReadModelError> {
        session
            .query_unpaged(EMAIL_REGISTRY_SCHEMA, &[])
            .await
            .map_err(ReadModelError::database)?;
        Ok(())
    }

    async fn owner(&self, email: &str) -> Result<Option<Uuid>, ReadModelError> {
        let result = self
            .session
            .query_unpaged("SELECT account_id FROM account_email_claims WHERE email = ?", (email,))
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

    async fn claim_inner(&self, email: &str, account_id: Uuid) -> Result<Claim, ReadModelError> {
        let result = self
            .session
            .query_unpaged(
                "INSERT INTO account_email_claims (email, account_id, claimed_at) VALUES (?, ?, ?) IF NOT EXISTS",
                (email, account_id, chrono::Utc::now()),
            )
            .await
            .map_err(ReadModelError::database)?;

        let row = result
            .into_rows_result()
            .map_err(ReadModelError::database)?
            .maybe_first_row::<Row>()
            .map_err(ReadModelError::database)?;

        // first column of an LWT result is `[applied]`
        let applied = match row.as_ref().and_then(|r| r.columns.first()) {
            Some(Some(CqlValue::Boolean(applied))) => *applied,
            _ => return Err(ReadModelError::Corrupt("LWT result without [applied]".to_string())),
        };
        if applied {
            return Ok(Claim::Granted);
        }

        match self.owner(email).await? {
            Some(owner) if owner == account_id => Ok(Claim::Granted),
            Some(owner) => Ok(Claim::HeldBy(owner)),
            // released between the insert and the read
            None => Err(ReadModelError::Database(format!("claim for {email} changed concurrently"))),
        }
    }
}

#[async_trait]
impl EmailRegistry for ScyllaEmailRegistry {
    async fn claim(&self, ctx: &RequestContext, email: &str, account_id: Uuid) -> Result<Claim, ReadModelError> {
        let claim = ctx.run(self.claim_inner(email, account_id)).await??;
        tracing::debug!(email = %email, account_id = %account_id, claim = ?claim, "Email claim");
        Ok(claim)
    }

    async fn release(&self, ctx: &RequestContext, email: &str, account_id: Uuid) -> Result<(), ReadModelError> {
        ctx.run(self.session.query_unpaged(
            "DELETE FROM account_email_claims WHERE email = ? IF account_id = ?",
            (email, account_id),
        ))
        .await?
        .map_err(ReadModelError::database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_is_exclusive_and_reentrant() {
        let registry = InMemoryEmailRegistry::new();
        let ctx = RequestContext::background();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(registry.claim(&ctx, "a@x.com", a).await.unwrap(), Claim::Granted);
        assert_eq!(registry.claim(&ctx, "a@x.com", a).await.unwrap(), Claim::Granted);
        assert_eq!(registry.claim(&ctx, "a@x.com", b).await.unwrap(), Claim::HeldBy(a));
    }

    #[tokio::test]
    async fn test_release_by_non_owner_keeps_claim() {
        let registry = InMemoryEmailRegistry::new();
        let ctx = RequestContext::background();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        registry.claim(&ctx, "a@x.com", a).await.unwrap();
        registry.release(&ctx, "a@x.com", b).await.unwrap();
        assert_eq!(registry.owner("a@x.com").await, Some(a));

        registry.release(&ctx, "a@x.com", a).await.unwrap();
        assert_eq!(registry.claim(&ctx, "a@x.com", b).await.unwrap(), Claim::Granted);
    }
}
