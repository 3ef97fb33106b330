#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use blinkly_api::{CredentialStore, StoredCredential};
use blinkly_config::{Config, FileCredentialStore, LogFormat, Profile, load_config_from, save_config_to};
use blinkly_core::{AuthCredentials, ConnectionState, Controller, ControllerConfig};
use chrono::Utc;
use pretty_assertions::assert_eq;
use secrecy::SecretString;

const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
refresh_interval = 45
log_format = "json"

[profiles.home]
email = "user@example.com"
password_env = "HOME_BLINK_PW"
unique_id = "install-1"

[profiles.cabin]
email = "cabin@example.com"
background_refresh = 0
"#;

#[test]
fn file_values_layer_over_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let cfg = load_config_from(&path).unwrap();

    assert_eq!(cfg.defaults.refresh_interval, 45);
    assert_eq!(cfg.defaults.timeout, 30);
    assert_eq!(cfg.defaults.background_refresh, 300);
    assert_eq!(cfg.defaults.log_format, LogFormat::Json);

    let (name, home) = cfg.profile(None).unwrap();
    assert_eq!(name, "home");
    assert_eq!(home.unique_id.as_deref(), Some("install-1"));
    assert_eq!(home.password_env.as_deref(), Some("HOME_BLINK_PW"));

    let (_, cabin) = cfg.profile(Some("cabin")).unwrap();
    assert_eq!(cabin.background_refresh, Some(0));
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(cfg.default_profile.as_deref(), Some("default"));
    assert!(cfg.profiles.is_empty());
    assert_eq!(cfg.defaults.refresh_interval, 30);
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sub/config.toml");

    let mut cfg = Config::default();
    cfg.profiles.insert(
        "default".into(),
        Profile {
            email: Some("user@example.com".into()),
            base_url: Some("http://localhost:9000/".into()),
            refresh_interval: Some(10),
            ..Profile::default()
        },
    );
    save_config_to(&path, &cfg).unwrap();

    let loaded = load_config_from(&path).unwrap();
    let (_, profile) = loaded.profile(None).unwrap();
    assert_eq!(profile.email.as_deref(), Some("user@example.com"));
    assert_eq!(profile.base_url.as_deref(), Some("http://localhost:9000/"));
    assert_eq!(profile.refresh_interval, Some(10));
}

#[test]
fn controller_restores_session_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCredentialStore::new(dir.path().join("home.credentials.toml"));
    store
        .save(&StoredCredential {
            email: "user@example.com".into(),
            password: None,
            unique_id: "install-1".into(),
            account_id: "42".into(),
            client_id: "7".into(),
            tier: "u011".into(),
            token: SecretString::from("tok".to_owned()),
            issued_at: Utc::now(),
        })
        .unwrap();

    let config = ControllerConfig::new(AuthCredentials::new(
        "user@example.com",
        SecretString::from("hunter2".to_owned()),
    ));
    let controller = Controller::with_http(config, Some(Arc::new(store))).unwrap();

    assert!(controller.restore().unwrap());
    assert!(controller.session().is_authenticated());
    assert_eq!(controller.session().session_info().unwrap().account_id, "42");
    assert_eq!(
        *controller.connection_state().borrow(),
        ConnectionState::Connected
    );
}

#[test]
fn controller_without_record_stays_disconnected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCredentialStore::new(dir.path().join("none.toml"));
    let config = ControllerConfig::new(AuthCredentials::new(
        "user@example.com",
        SecretString::from("pw".to_owned()),
    ));
    let controller = Controller::with_http(config, Some(Arc::new(store))).unwrap();

    assert!(!controller.restore().unwrap());
    assert!(!controller.session().is_authenticated());
    assert_eq!(
        *controller.connection_state().borrow(),
        ConnectionState::Disconnected
    );
}
