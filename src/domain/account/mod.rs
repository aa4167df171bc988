pub mod aggregate;
pub mod command_handler;
pub mod commands;
pub mod email_registry;
pub mod errors;
pub mod events;
pub mod projection;
pub mod query_handler;
pub mod read_model;
pub mod scylla_read_model;
pub mod value_objects;

pub use aggregate::{stream_name, AccountAggregate};
pub use command_handler::{
    AccountCommandHandlers, ChangeEmailHandler, ChangePasswordHandler, CommandHandler,
    CreateAccountHandler, HandlerDeps, RestorePasswordHandler,
};
pub use commands::AccountCommand;
pub use email_registry::{
    Claim, EmailRegistry, InMemoryEmailRegistry, ScyllaEmailRegistry, EMAIL_REGISTRY_SCHEMA,
};
pub use errors::AccountError;
pub use events::{AccountEvent, AccountEventType};
pub use projection::{AccountProjection, ProjectionError, ProjectionProcessor};
pub use query_handler::{AccountQuery, AccountQueryHandler, AccountView, DeviceQueryHandler};
pub use read_model::{AccountReadModel, AccountRecord, InMemoryAccountReadModel, ReadModelError};
pub use scylla_read_model::{ensure_read_model_schema, ScyllaAccountReadModel};
pub use value_objects::{is_strong_password, DeviceToken, Email, IsMentor, PasswordHash};
