// ── Runtime connection configuration ──
//
// These types describe *how* to talk to the Blink cloud for one account.
// They carry credential data and timing knobs, but never touch disk.
// `blinkly-config` (or any embedding application) builds a
// `ControllerConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use blinkly_api::LoginCredentials;
use blinkly_api::transport::{TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

/// Account credentials.
#[derive(Debug, Clone)]
pub struct AuthCredentials {
    pub email: String,
    pub password: SecretString,
    /// Installation id sent with every login. Generated when absent, but
    /// a persisted value avoids repeated two-factor prompts.
    pub unique_id: Option<String>,
}

impl AuthCredentials {
    pub fn new(email: impl Into<String>, password: SecretString) -> Self {
        Self {
            email: email.into(),
            password,
            unique_id: None,
        }
    }

    pub(crate) fn to_login(&self) -> LoginCredentials {
        let login = LoginCredentials::new(self.email.clone(), self.password.clone());
        match &self.unique_id {
            Some(id) => login.with_unique_id(id.clone()),
            None => login,
        }
    }
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store.
    #[default]
    SystemDefaults,
    /// Additionally trust a CA certificate file.
    CustomCa(PathBuf),
}

/// Configuration for one account.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub auth: AuthCredentials,
    /// Send every call to this host instead of the production hosts.
    pub base_url: Option<Url>,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
    /// Minimum spacing between non-forced refreshes. Applies to the
    /// controller and to every hub it owns.
    pub refresh_interval: Duration,
    /// Period of the background refresh task. `Duration::ZERO` disables it.
    pub background_refresh: Duration,
}

impl ControllerConfig {
    pub fn new(auth: AuthCredentials) -> Self {
        Self {
            auth,
            base_url: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(30),
            background_refresh: Duration::from_secs(300),
        }
    }

    pub(crate) fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            },
            timeout: self.timeout,
        }
    }
}
