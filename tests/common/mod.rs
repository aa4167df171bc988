#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use sso_core::context::RequestContext;
use sso_core::domain::account::{
    AccountCommandHandlers, AccountProjection, AccountQueryHandler, HandlerDeps, InMemoryAccountReadModel,
    InMemoryEmailRegistry, ProjectionProcessor,
};
use sso_core::event_sourcing::{AggregateStore, EventStore, InMemoryEventStore, LogPosition};
use sso_core::services::{AuthConfig, AuthService, InMemoryMailSender, InMemoryOtpRepository};
use sso_core::token::{
    InMemoryRevocationCache, InMemoryTokenRepository, SigningKeys, TokenConfig, TokenService,
};

pub const PRIVATE_KEY: &str = include_str!("../fixtures/private_key.pem");
pub const PUBLIC_KEY: &str = include_str!("../fixtures/public_key.pem");
pub const OTHER_PRIVATE_KEY: &str = include_str!("../fixtures/other_private_key.pem");

pub const TEST_COST: u32 = 4;
pub const PASSWORD: &str = "Valid1@";

/// Whole core wired to in-memory backends. The projection is driven by
/// hand through `project`, so tests control when the read model catches up.
pub struct Harness {
    pub ctx: RequestContext,
    pub store: Arc<InMemoryEventStore>,
    pub read_model: Arc<InMemoryAccountReadModel>,
    pub emails: Arc<InMemoryEmailRegistry>,
    pub commands: Arc<AccountCommandHandlers>,
    pub queries: AccountQueryHandler,
    pub projection: AccountProjection,
    pub token_repo: Arc<InMemoryTokenRepository>,
    pub cache: Arc<InMemoryRevocationCache>,
    pub tokens: Arc<TokenService>,
    pub otp: Arc<InMemoryOtpRepository>,
    pub mail: Arc<InMemoryMailSender>,
    pub auth: AuthService,
    cursor: Mutex<Option<LogPosition>>,
}

pub fn signing_keys() -> SigningKeys {
    SigningKeys::from_pem(PRIVATE_KEY.as_bytes(), PUBLIC_KEY.as_bytes()).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let read_model = Arc::new(InMemoryAccountReadModel::new());
        let emails = Arc::new(InMemoryEmailRegistry::new());
        let commands = Arc::new(AccountCommandHandlers::new(HandlerDeps::new(
            AggregateStore::new(store.clone()),
            read_model.clone(),
            emails.clone(),
        )));

        let token_repo = Arc::new(InMemoryTokenRepository::new());
        let cache = Arc::new(InMemoryRevocationCache::new());
        let tokens = Arc::new(TokenService::new(
            signing_keys(),
            token_repo.clone(),
            cache.clone(),
            TokenConfig::default(),
        ));

        let otp = Arc::new(InMemoryOtpRepository::new());
        let mail = Arc::new(InMemoryMailSender::new());
        let auth = AuthService::new(
            commands.clone(),
            read_model.clone(),
            tokens.clone(),
            otp.clone(),
            mail.clone(),
            AuthConfig {
                bcrypt_cost: TEST_COST,
                otp_length: 6,
                otp_ttl: Duration::from_secs(60),
                otp_max_attempts: 3,
            },
        );

        Self {
            ctx: RequestContext::background(),
            queries: AccountQueryHandler::new(read_model.clone()),
            projection: AccountProjection::new(read_model.clone()),
            store,
            read_model,
            emails,
            commands,
            token_repo,
            cache,
            tokens,
            otp,
            mail,
            auth,
            cursor: Mutex::new(None),
        }
    }

    /// Run every event appended since the last call through the projection.
    pub async fn project(&self) {
        let mut cursor = self.cursor.lock().await;
        let batch = self.store.read_log(&self.ctx, *cursor, 1_000).await.unwrap();
        for delivered in batch {
            self.projection
                .process_event(&self.ctx, &delivered.envelope)
                .await
                .unwrap();
            *cursor = Some(delivered.position);
        }
    }
}
