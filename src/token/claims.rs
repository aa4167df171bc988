use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Token Claims
// ============================================================================
//
// Wire names are fixed by existing consumers: camelCase for the subject
// fields, `issuer`/`subject` spelled out instead of `iss`/`sub`.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub token_type: TokenKind,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub issuer: String,
    /// Subject email
    pub subject: String,
    #[serde(rename = "subjectId")]
    pub subject_id: Uuid,
    #[serde(rename = "isMentor")]
    pub is_mentor: bool,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// Who a token is minted for.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSubject {
    pub email: String,
    pub subject_id: Uuid,
    pub device_id: String,
    pub is_mentor: bool,
}

/// A signed token together with the claims it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenConfig {
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl TokenConfig {
    pub fn ttl_for(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "auth.service".to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_wire_names() {
        let claims = Claims {
            token_type: TokenKind::Refresh,
            exp: 200,
            iat: 100,
            jti: "j".to_string(),
            device_id: "phone".to_string(),
            issuer: "auth.service".to_string(),
            subject: "a@x.com".to_string(),
            subject_id: Uuid::nil(),
            is_mentor: true,
        };

        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["token_type"], "refresh");
        assert_eq!(json["deviceId"], "phone");
        assert_eq!(json["subjectId"], Uuid::nil().to_string());
        assert_eq!(json["isMentor"], true);
        assert_eq!(json["subject"], "a@x.com");
        assert_eq!(claims.expires_at().timestamp(), 200);
    }

    #[test]
    fn test_ttl_for_kind() {
        let config = TokenConfig::default();
        assert_eq!(config.ttl_for(TokenKind::Access), Duration::from_secs(900));
        assert!(config.ttl_for(TokenKind::Refresh) > config.access_ttl);
    }
}
