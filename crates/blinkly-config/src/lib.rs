//! Shared configuration for Blink tools.
//!
//! TOML profiles, password resolution (env + keyring + plaintext), the
//! on-disk credential store, logging setup, and translation to
//! `blinkly_core::ControllerConfig`.

pub mod credentials;
pub mod logging;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use blinkly_core::{AuthCredentials, ControllerConfig, TlsVerification};

pub use credentials::FileCredentialStore;
pub use logging::{LogFormat, init_logging};

const KEYRING_SERVICE: &str = "blinkly";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' is not defined")]
    UnknownProfile { profile: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Resolve `name` (or the default profile) to its definition.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name, p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Minimum spacing between non-forced refreshes, seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Background refresh period, seconds. 0 disables it.
    #[serde(default = "default_background_refresh")]
    pub background_refresh: u64,

    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            refresh_interval: default_refresh_interval(),
            background_refresh: default_background_refresh(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_refresh_interval() -> u64 {
    30
}
fn default_background_refresh() -> u64 {
    300
}

/// One Blink account.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Account email. Falls back to `BLINKLY_EMAIL`.
    pub email: Option<String>,

    /// Password in plaintext. Prefer the keyring or an env var.
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Installation id reused across logins.
    pub unique_id: Option<String>,

    /// Override the cloud host (testing, proxies).
    pub base_url: Option<String>,

    /// Path to an extra CA certificate.
    pub ca_cert: Option<PathBuf>,

    pub timeout: Option<u64>,
    pub refresh_interval: Option<u64>,
    pub background_refresh: Option<u64>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "blinkly", "blinkly")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("blinkly");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where `profile`'s persisted session lives.
pub fn credentials_path(profile: &str) -> PathBuf {
    let file = format!("{profile}.credentials.toml");
    project_dirs().map_or_else(
        || dirs_fallback().join(&file),
        |dirs| dirs.data_dir().join(&file),
    )
}

// ── Loading & saving ────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` layered as defaults → file → `BLINKLY_` env.
///
/// Nested keys use a double underscore:
/// `BLINKLY_DEFAULTS__REFRESH_INTERVAL=60`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("BLINKLY_").split("__"))
        .extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the account password: profile env var, `BLINKLY_PASSWORD`,
/// system keyring, then plaintext.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_password_with(
        profile,
        profile_name,
        |name| std::env::var(name).ok(),
        keyring_password,
    )
}

fn keyring_password(profile_name: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .and_then(|entry| entry.get_password())
        .ok()
}

fn resolve_password_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env, then the global variable
    let from_env = profile
        .password_env
        .as_deref()
        .and_then(&env)
        .or_else(|| env("BLINKLY_PASSWORD"));
    if let Some(pw) = from_env {
        return Ok(SecretString::from(pw));
    }

    // 2. System keyring
    if let Some(pw) = keyring(profile_name) {
        return Ok(SecretString::from(pw));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store `password` in the system keyring for `profile_name`.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .and_then(|entry| entry.set_password(password))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

fn resolve_auth(
    profile: &Profile,
    profile_name: &str,
    password: SecretString,
) -> Result<AuthCredentials, ConfigError> {
    let email = profile
        .email
        .clone()
        .or_else(|| std::env::var("BLINKLY_EMAIL").ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })?;
    let mut auth = AuthCredentials::new(email, password);
    auth.unique_id.clone_from(&profile.unique_id);
    Ok(auth)
}

// ── Profile → ControllerConfig ──────────────────────────────────────

/// Build a `ControllerConfig` from a profile, falling back to `defaults`
/// for every timing knob the profile leaves unset.
pub fn profile_to_controller_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ControllerConfig, ConfigError> {
    let password = resolve_password(profile, profile_name)?;
    build_controller_config(profile, profile_name, defaults, password)
}

fn build_controller_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    password: SecretString,
) -> Result<ControllerConfig, ConfigError> {
    let base_url = profile
        .base_url
        .as_deref()
        .map(|raw| {
            raw.parse::<url::Url>().map_err(|_| ConfigError::Validation {
                field: "base_url".into(),
                reason: format!("invalid URL: {raw}"),
            })
        })
        .transpose()?;

    let mut config = ControllerConfig::new(resolve_auth(profile, profile_name, password)?);
    config.base_url = base_url;
    config.tls = profile
        .ca_cert
        .clone()
        .map_or(TlsVerification::SystemDefaults, TlsVerification::CustomCa);
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.refresh_interval =
        Duration::from_secs(profile.refresh_interval.unwrap_or(defaults.refresh_interval));
    config.background_refresh = Duration::from_secs(
        profile
            .background_refresh
            .unwrap_or(defaults.background_refresh),
    );
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn profile() -> Profile {
        Profile {
            email: Some("user@example.com".into()),
            password: Some("plaintext".into()),
            password_env: Some("HOME_PW".into()),
            ..Profile::default()
        }
    }

    #[test]
    fn password_chain_prefers_env_then_keyring_then_plaintext() {
        let p = profile();
        let resolve = |env: Option<&str>, global: Option<&str>, keyring: Option<&str>| {
            resolve_password_with(
                &p,
                "home",
                |name| match name {
                    "HOME_PW" => env.map(str::to_owned),
                    "BLINKLY_PASSWORD" => global.map(str::to_owned),
                    _ => None,
                },
                |_| keyring.map(str::to_owned),
            )
            .unwrap()
            .expose_secret()
            .to_owned()
        };

        assert_eq!(resolve(Some("env"), Some("global"), Some("ring")), "env");
        assert_eq!(resolve(None, Some("global"), Some("ring")), "global");
        assert_eq!(resolve(None, None, Some("ring")), "ring");
        assert_eq!(resolve(None, None, None), "plaintext");
    }

    #[test]
    fn missing_password_is_reported_per_profile() {
        let err = resolve_password_with(&Profile::default(), "cabin", |_| None, |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { ref profile } if profile == "cabin"));
    }

    #[test]
    fn profile_overrides_defaults() {
        let mut p = profile();
        p.refresh_interval = Some(90);
        p.base_url = Some("http://localhost:8080/".into());
        p.ca_cert = Some(PathBuf::from("/etc/blink-ca.pem"));

        let cfg =
            build_controller_config(&p, "home", &Defaults::default(), SecretString::from("pw".to_owned()))
                .unwrap();

        assert_eq!(cfg.auth.email, "user@example.com");
        assert_eq!(cfg.refresh_interval, Duration::from_secs(90));
        assert_eq!(cfg.background_refresh, Duration::from_secs(300));
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.base_url.unwrap().as_str(), "http://localhost:8080/");
        assert_eq!(cfg.tls, TlsVerification::CustomCa(PathBuf::from("/etc/blink-ca.pem")));
    }

    #[test]
    fn bad_base_url_is_a_validation_error() {
        let mut p = profile();
        p.base_url = Some("not a url".into());
        let err =
            build_controller_config(&p, "home", &Defaults::default(), SecretString::from("pw".to_owned()))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "base_url"));
    }

    #[test]
    fn default_profile_resolution() {
        let mut cfg = Config::default();
        cfg.profiles.insert("default".into(), profile());
        cfg.profiles.insert("cabin".into(), Profile::default());

        assert_eq!(cfg.profile(None).unwrap().0, "default");
        assert_eq!(cfg.profile(Some("cabin")).unwrap().0, "cabin");
        assert!(matches!(
            cfg.profile(Some("barn")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }
}
