use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::token::TokenConfig;

/// Runtime settings, read once at bootstrap.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub scylla_nodes: Vec<String>,
    pub scylla_keyspace: String,
    pub redis_url: String,
    pub private_key_path: String,
    pub public_key_path: String,
    pub token_issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub projections_group: String,
    pub subscription_batch_size: usize,
    pub subscription_poll_interval: Duration,
    pub subscription_lookback: Duration,
    pub projection_max_attempts: u32,
    pub bcrypt_cost: u32,
    pub otp_length: usize,
    pub otp_ttl: Duration,
    pub otp_max_attempts: u32,
    pub metrics_port: u16,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let private_key_path = required(vars, "PRIVATE_KEY_PATH")?;
        let public_key_path = required(vars, "PUBLIC_KEY_PATH")?;

        let scylla_nodes = vars
            .get("SCYLLA_NODES")
            .map(|s| {
                s.split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| vec!["127.0.0.1:9042".to_string()]);

        if scylla_nodes.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "SCYLLA_NODES".to_string(),
                value: String::new(),
            });
        }

        let access_minutes: u64 = parsed(vars, "ACCESS_TOKEN_TTL_MINUTES", 15)?;
        let refresh_days: u64 = parsed(vars, "REFRESH_TOKEN_TTL_DAYS", 30)?;
        let bcrypt_cost: u32 = parsed(vars, "BCRYPT_COST", bcrypt::DEFAULT_COST)?;

        // bcrypt rejects costs outside 4..=31
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                name: "BCRYPT_COST".to_string(),
                value: bcrypt_cost.to_string(),
            });
        }

        Ok(AppConfig {
            scylla_nodes,
            scylla_keyspace: optional(vars, "SCYLLA_KEYSPACE", "sso"),
            redis_url: optional(vars, "REDIS_URL", "redis://127.0.0.1:6379"),
            private_key_path,
            public_key_path,
            token_issuer: optional(vars, "TOKEN_ISSUER", "auth.service"),
            access_token_ttl: Duration::from_secs(access_minutes * 60),
            refresh_token_ttl: Duration::from_secs(refresh_days * 24 * 60 * 60),
            projections_group: optional(vars, "PROJECTIONS_GROUP_NAME", "account-projection"),
            subscription_batch_size: parsed(vars, "SUBSCRIPTION_BATCH_SIZE", 100)?,
            subscription_poll_interval: Duration::from_millis(parsed(
                vars,
                "SUBSCRIPTION_POLL_INTERVAL_MS",
                500,
            )?),
            subscription_lookback: Duration::from_millis(parsed(
                vars,
                "SUBSCRIPTION_LOOKBACK_MS",
                5000,
            )?),
            projection_max_attempts: parsed(vars, "PROJECTION_MAX_ATTEMPTS", 5)?,
            bcrypt_cost,
            otp_length: parsed(vars, "OTP_LENGTH", 6)?,
            otp_ttl: Duration::from_secs(parsed(vars, "OTP_TTL_SECONDS", 600)?),
            otp_max_attempts: parsed(vars, "OTP_MAX_ATTEMPTS", 5)?,
            metrics_port: parsed(vars, "METRICS_PORT", 9090)?,
        })
    }

    pub fn token_config(&self) -> TokenConfig {
        TokenConfig {
            issuer: self.token_issuer.clone(),
            access_ttl: self.access_token_ttl,
            refresh_ttl: self.refresh_token_ttl,
        }
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional(vars: &HashMap<String, String>, name: &str, default: &str) -> String {
    vars.get(name)
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn parsed<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("PRIVATE_KEY_PATH".to_string(), "/keys/private.pem".to_string()),
            ("PUBLIC_KEY_PATH".to_string(), "/keys/public.pem".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = AppConfig::from_vars(&base_vars()).unwrap();

        assert_eq!(config.scylla_nodes, vec!["127.0.0.1:9042".to_string()]);
        assert_eq!(config.token_issuer, "auth.service");
        assert_eq!(config.access_token_ttl, Duration::from_secs(15 * 60));
        assert_eq!(config.refresh_token_ttl, Duration::from_secs(30 * 86_400));
        assert_eq!(config.projections_group, "account-projection");
        assert_eq!(config.otp_length, 6);
        assert_eq!(config.otp_max_attempts, 5);
        assert_eq!(config.subscription_lookback, Duration::from_secs(5));
        assert_eq!(config.metrics_port, 9090);
    }

    #[test]
    fn test_from_vars_overrides() {
        let mut vars = base_vars();
        vars.insert("SCYLLA_NODES".to_string(), "10.0.0.1:9042, 10.0.0.2:9042".to_string());
        vars.insert("ACCESS_TOKEN_TTL_MINUTES".to_string(), "5".to_string());
        vars.insert("TOKEN_ISSUER".to_string(), "issuer.test".to_string());
        vars.insert("BCRYPT_COST".to_string(), "4".to_string());

        let config = AppConfig::from_vars(&vars).unwrap();

        assert_eq!(config.scylla_nodes.len(), 2);
        assert_eq!(config.scylla_nodes[1], "10.0.0.2:9042");
        assert_eq!(config.bcrypt_cost, 4);

        let token = config.token_config();
        assert_eq!(token.issuer, "issuer.test");
        assert_eq!(token.access_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_from_vars_missing_private_key_path() {
        let vars = HashMap::from([("PUBLIC_KEY_PATH".to_string(), "/k.pem".to_string())]);
        let result = AppConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(name)) if name == "PRIVATE_KEY_PATH"));
    }

    #[test]
    fn test_from_vars_rejects_garbage_number() {
        let mut vars = base_vars();
        vars.insert("METRICS_PORT".to_string(), "not-a-port".to_string());
        let result = AppConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_from_vars_rejects_out_of_range_bcrypt_cost() {
        let mut vars = base_vars();
        vars.insert("BCRYPT_COST".to_string(), "2".to_string());
        let result = AppConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue { name, .. }) if name == "BCRYPT_COST"));
    }
}
