pub mod auth;
pub mod collaborators;

pub use auth::{AuthConfig, AuthError, AuthService, SignUp, SignUpOutcome};
pub use collaborators::{
    generate_numeric_code, CollaboratorError, InMemoryMailSender, InMemoryOtpRepository, LoggingMailSender,
    MailSender, OtpRepository, RedisOtpRepository, SentMail,
};
