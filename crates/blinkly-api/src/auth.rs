use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Account credentials used for the initial login and every re-login.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub email: String,
    pub password: SecretString,
    /// Stable per-installation client identifier sent with every login.
    /// The cloud ties 2FA verification to it, so it must survive restarts.
    pub unique_id: String,
}

impl LoginCredentials {
    /// Credentials with a freshly generated `unique_id`.
    pub fn new(email: impl Into<String>, password: SecretString) -> Self {
        Self {
            email: email.into(),
            password,
            unique_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }
}

/// Public view of the live session. Never carries the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub account_id: String,
    pub client_id: String,
    /// Region tier selecting the REST host (`rest-{tier}`).
    pub tier: String,
    pub issued_at: DateTime<Utc>,
}

/// Result of a login attempt that reached the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The session is usable immediately.
    Authenticated(SessionInfo),
    /// A PIN was emailed; call `submit_2fa` before issuing requests.
    VerificationRequired(SessionInfo),
}

impl LoginOutcome {
    pub fn info(&self) -> &SessionInfo {
        match self {
            Self::Authenticated(info) | Self::VerificationRequired(info) => info,
        }
    }

    pub fn needs_verification(&self) -> bool {
        matches!(self, Self::VerificationRequired(_))
    }
}

/// The small credential record persisted between runs.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub email: String,
    pub password: Option<SecretString>,
    pub unique_id: String,
    pub account_id: String,
    pub client_id: String,
    pub tier: String,
    pub token: SecretString,
    pub issued_at: DateTime<Utc>,
}

impl StoredCredential {
    pub fn session_info(&self) -> SessionInfo {
        SessionInfo {
            account_id: self.account_id.clone(),
            client_id: self.client_id.clone(),
            tier: self.tier.clone(),
            issued_at: self.issued_at,
        }
    }
}

/// Load/save capability for the persisted credential record.
///
/// Implementations are expected to be quick local operations;
/// `blinkly-config` ships a TOML file implementation.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredCredential>, Error>;
    fn save(&self, credential: &StoredCredential) -> Result<(), Error>;
}

// ── Wire shapes ──────────────────────────────────────────────────────

/// Login response body.
#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub account: LoginAccount,
    pub auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginAccount {
    #[serde(deserialize_with = "crate::models::string_or_number")]
    pub account_id: String,
    #[serde(deserialize_with = "crate::models::string_or_number")]
    pub client_id: String,
    #[serde(default = "default_tier")]
    pub tier: String,
    #[serde(default)]
    pub client_verification_required: bool,
    #[serde(default)]
    pub account_verification_required: bool,
}

impl LoginAccount {
    pub fn verification_required(&self) -> bool {
        self.client_verification_required || self.account_verification_required
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginAuth {
    pub token: String,
}

/// PIN verification response body.
#[derive(Debug, Deserialize)]
pub(crate) struct VerifyResponse {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_tier() -> String {
    "prod".into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_response_normalizes_numeric_ids() {
        let body = json!({
            "account": {
                "account_id": 1337,
                "client_id": 42,
                "tier": "u011",
                "region": "us",
                "client_verification_required": true
            },
            "auth": { "token": "abc" }
        });
        let resp: LoginResponse = serde_json::from_value(body).unwrap();
        assert_eq!(resp.account.account_id, "1337");
        assert_eq!(resp.account.client_id, "42");
        assert_eq!(resp.account.tier, "u011");
        assert!(resp.account.verification_required());
    }

    #[test]
    fn generated_unique_ids_differ() {
        let a = LoginCredentials::new("a@example.com", SecretString::from("x".to_owned()));
        let b = LoginCredentials::new("a@example.com", SecretString::from("x".to_owned()));
        assert_ne!(a.unique_id, b.unique_id);
    }
}
