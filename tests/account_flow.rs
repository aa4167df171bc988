mod common;

use secrecy::SecretString;
use uuid::Uuid;

use common::{Harness, PASSWORD, TEST_COST};
use sso_core::domain::account::{
    AccountAggregate, AccountCommand, AccountError, AccountEvent, AccountQuery, DeviceToken, Email, IsMentor,
    PasswordHash, ProjectionError, ProjectionProcessor,
};
use sso_core::domain::account::events::RegisterAccount;
use sso_core::error::{ErrorKind, HasErrorKind};
use sso_core::event_sourcing::{Aggregate, AggregateStore, EventStore, ExpectedVersion};

fn create(id: Uuid, email: &str) -> AccountCommand {
    AccountCommand::CreateAccount {
        aggregate_id: id,
        email: Email::parse(email).unwrap(),
        password: PasswordHash::hash_with_cost(PASSWORD, TEST_COST).unwrap(),
        is_mentor: IsMentor(true),
        device_token: DeviceToken::new("push-token"),
    }
}

#[tokio::test]
async fn test_change_email_moves_read_model_key() {
    let h = Harness::new();
    let id = Uuid::new_v4();

    h.commands.dispatch(&h.ctx, create(id, "a@x.com")).await.unwrap();
    h.project().await;

    h.commands
        .dispatch(
            &h.ctx,
            AccountCommand::ChangeEmail {
                aggregate_id: id,
                new_email: Email::parse("b@x.com").unwrap(),
                password: SecretString::from(PASSWORD),
            },
        )
        .await
        .unwrap();
    h.project().await;

    let view = h
        .queries
        .handle(&h.ctx, AccountQuery::GetByEmail("b@x.com".to_string()))
        .await
        .unwrap();
    assert_eq!(view.id, id);
    assert!(view.is_mentor);

    let missing = h
        .queries
        .handle(&h.ctx, AccountQuery::GetByEmail("a@x.com".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(missing, AccountError::NotFound(_)));
}

#[tokio::test]
async fn test_unknown_stream_loads_empty() {
    let h = Harness::new();
    let events = h.store.load(&h.ctx, Uuid::new_v4()).await.unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_replay_is_deterministic_and_version_counts_events() {
    let h = Harness::new();
    let id = Uuid::new_v4();

    h.commands.dispatch(&h.ctx, create(id, "a@x.com")).await.unwrap();
    h.project().await;
    h.commands
        .dispatch(
            &h.ctx,
            AccountCommand::ChangeEmail {
                aggregate_id: id,
                new_email: Email::parse("c@x.com").unwrap(),
                password: SecretString::from(PASSWORD),
            },
        )
        .await
        .unwrap();
    h.commands
        .dispatch(
            &h.ctx,
            AccountCommand::RestorePassword {
                aggregate_id: id,
                password: PasswordHash::hash_with_cost("Other2#", TEST_COST).unwrap(),
            },
        )
        .await
        .unwrap();

    let aggregates = AggregateStore::new(h.store.clone());
    let mut first = AccountAggregate::with_id(id);
    let mut second = AccountAggregate::with_id(id);
    let applied = aggregates.load_and_apply(&h.ctx, &mut first).await.unwrap();
    aggregates.load_and_apply(&h.ctx, &mut second).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(applied, 3);
    assert_eq!(first.version(), 3);
    assert_eq!(first.email.as_ref().map(|e| e.as_str()), Some("c@x.com"));
    assert!(first.password.as_ref().unwrap().verify("Other2#"));
}

#[tokio::test]
async fn test_duplicate_email_is_rejected_after_projection() {
    let h = Harness::new();

    h.commands.dispatch(&h.ctx, create(Uuid::new_v4(), "a@x.com")).await.unwrap();
    h.project().await;

    let err = h
        .commands
        .dispatch(&h.ctx, create(Uuid::new_v4(), "a@x.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, AccountError::EmailTaken(_)));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.read_model.len().await, 1);
}

#[tokio::test]
async fn test_duplicate_email_is_rejected_before_projection() {
    let h = Harness::new();
    let first = Uuid::new_v4();

    // the read model has not seen either command
    h.commands.dispatch(&h.ctx, create(first, "a@x.com")).await.unwrap();
    let err = h
        .commands
        .dispatch(&h.ctx, create(Uuid::new_v4(), "a@x.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, AccountError::EmailTaken(_)));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.emails.owner("a@x.com").await, Some(first));
}

#[tokio::test]
async fn test_duplicate_email_reaching_the_projection_never_adds_a_row() {
    let h = Harness::new();
    let winner = Uuid::new_v4();
    let loser = Uuid::new_v4();

    h.commands.dispatch(&h.ctx, create(winner, "a@x.com")).await.unwrap();

    // a registration written to the log without going through the handlers
    let stray = AccountEvent::RegisterAccount(RegisterAccount {
        id: loser,
        email: Email::parse("a@x.com").unwrap(),
        password: PasswordHash::hash_with_cost(PASSWORD, TEST_COST).unwrap(),
        is_mentor: IsMentor(false),
        device_token: DeviceToken::default(),
    })
    .into_envelope(loser, 1)
    .unwrap();
    h.store
        .append(&h.ctx, loser, ExpectedVersion::Exact(0), vec![stray])
        .await
        .unwrap();

    let log = h.store.read_log(&h.ctx, None, 10).await.unwrap();
    assert_eq!(log.len(), 2);

    h.projection.process_event(&h.ctx, &log[0].envelope).await.unwrap();
    let err = h
        .projection
        .process_event(&h.ctx, &log[1].envelope)
        .await
        .unwrap_err();

    assert!(matches!(err, ProjectionError::Conflict(_)));
    assert_eq!(h.read_model.len().await, 1);
    let view = h
        .queries
        .handle(&h.ctx, AccountQuery::GetByEmail("a@x.com".to_string()))
        .await
        .unwrap();
    assert_eq!(view.id, winner);
}

#[tokio::test]
async fn test_redelivered_events_are_idempotent() {
    let h = Harness::new();
    let id = Uuid::new_v4();
    h.commands.dispatch(&h.ctx, create(id, "a@x.com")).await.unwrap();
    h.commands
        .dispatch(
            &h.ctx,
            AccountCommand::ChangeEmail {
                aggregate_id: id,
                new_email: Email::parse("b@x.com").unwrap(),
                password: SecretString::from(PASSWORD),
            },
        )
        .await
        .unwrap();

    let log = h.store.read_log(&h.ctx, None, 10).await.unwrap();
    for _ in 0..2 {
        for delivered in &log {
            h.projection.process_event(&h.ctx, &delivered.envelope).await.unwrap();
        }
    }

    assert_eq!(h.read_model.len().await, 1);
    let view = h.queries.handle(&h.ctx, AccountQuery::GetById(id)).await.unwrap();
    assert_eq!(view.email, "b@x.com");
}
