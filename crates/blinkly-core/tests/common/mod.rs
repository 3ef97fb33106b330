#![allow(dead_code, clippy::unwrap_used)]

// Scripted in-process transport shared by the core integration tests.
//
// Routes are keyed by URL path. Every request is recorded so tests can
// assert on exactly what went over the wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blinkly_api::{
    ApiRequest, ApiResponse, Error, LoginCredentials, Method, NetworkSnapshot, SessionManager,
    Transport,
};
use blinkly_core::{AuthCredentials, ControllerConfig, DeviceRegistry, HubKind, SyncModule};
use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;

pub const BASE: &str = "http://blink.test/";
pub const LOGIN: &str = "/api/v5/account/login";
pub const HOMESCREEN: &str = "/api/v3/accounts/1/homescreen";

#[derive(Clone)]
pub enum Reply {
    Json(u16, Value),
    /// Surface as an expired token.
    Expired,
    /// Never complete.
    Hang,
    /// Answer after the given (tokio) delay.
    Delayed(Duration, u16, Value),
    /// Answer only requests carrying this token; anything else expires.
    Token(&'static str, u16, Value),
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

pub struct MockTransport {
    routes: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<Recorded>>,
}

impl MockTransport {
    /// A transport that already answers login for account 1 / client 2.
    pub fn new() -> Arc<Self> {
        let transport = Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        });
        transport.route(LOGIN, 200, login_response(false));
        transport
    }

    pub fn route(&self, path: &str, status: u16, body: Value) {
        self.reply(path, Reply::Json(status, body));
    }

    pub fn reply(&self, path: &str, reply: Reply) {
        self.routes.lock().unwrap().insert(path.to_owned(), reply);
    }

    pub fn homescreen(&self, snapshot: Value) {
        self.route(HOMESCREEN, 200, snapshot);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests other than login.
    pub fn api_requests(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path != LOGIN)
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        let path = request.url.path().to_owned();
        self.requests.lock().unwrap().push(Recorded {
            method: request.method.clone(),
            path: path.clone(),
            body: request.body.clone(),
        });
        let reply = self.routes.lock().unwrap().get(&path).cloned();
        match reply {
            Some(Reply::Json(status, body)) => Ok(ApiResponse::new(status, body)),
            Some(Reply::Expired) => Err(Error::SessionExpired),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Delayed(delay, status, body)) => {
                tokio::time::sleep(delay).await;
                Ok(ApiResponse::new(status, body))
            }
            Some(Reply::Token(token, status, body)) => {
                let sent = request
                    .headers
                    .get("token_auth")
                    .and_then(|v| v.to_str().ok());
                if sent == Some(token) {
                    Ok(ApiResponse::new(status, body))
                } else {
                    Err(Error::SessionExpired)
                }
            }
            None => Ok(ApiResponse::new(404, json!({"message": "not found"}))),
        }
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn login_response(verify: bool) -> Value {
    json!({
        "account": {
            "account_id": 1,
            "client_id": 2,
            "tier": "test",
            "client_verification_required": verify
        },
        "auth": { "token": "tok" }
    })
}

pub fn config() -> ControllerConfig {
    let mut config = ControllerConfig::new(AuthCredentials::new(
        "user@example.com",
        SecretString::from("hunter2".to_owned()),
    ));
    config.base_url = Some(Url::parse(BASE).unwrap());
    config.refresh_interval = Duration::from_secs(30);
    config.background_refresh = Duration::ZERO;
    config
}

/// A logged-in session over `transport`.
pub async fn session(transport: &Arc<MockTransport>) -> Arc<SessionManager> {
    let session = SessionManager::new(transport.clone()).with_base_url(Url::parse(BASE).unwrap());
    session
        .login(LoginCredentials::new(
            "user@example.com",
            SecretString::from("hunter2".to_owned()),
        ))
        .await
        .unwrap();
    Arc::new(session)
}

pub fn hub(session: &Arc<SessionManager>, name: &str, network_id: &str, kind: HubKind) -> SyncModule {
    SyncModule::new(
        name,
        network_id,
        kind,
        Arc::clone(session),
        Arc::new(DeviceRegistry::default()),
        Duration::from_secs(30),
    )
}

pub fn snapshot(value: Value) -> NetworkSnapshot {
    serde_json::from_value(value).unwrap()
}

/// The hawk entry from the standalone-hub scenario.
pub fn hawk_entry() -> Value {
    json!({
        "name": "test",
        "id": 2,
        "serial": "foobar123",
        "enabled": true,
        "network_id": 1,
        "thumbnail": "/foo/bar"
    })
}

/// One sync module on network 1234 with a catalina camera and a mini.
pub fn home_snapshot() -> Value {
    json!({
        "networks": [{"id": 1234, "name": "home", "armed": false}],
        "sync_modules": [{
            "id": 10, "network_id": 1234, "name": "home sm",
            "serial": "sm-serial", "status": "online"
        }],
        "cameras": [{
            "id": 5, "network_id": 1234, "name": "porch", "type": "catalina",
            "enabled": true, "thumbnail": "/t/porch-old", "battery": "ok"
        }],
        "owls": [{
            "id": 6, "network_id": 1234, "name": "den", "enabled": false,
            "thumbnail": "/t/den"
        }]
    })
}

/// Routes the network info and porch config for `home_snapshot`.
pub fn route_home(transport: &MockTransport) {
    transport.route("/network/1234", 200, json!({"network": {"armed": true}}));
    transport.route(
        "/network/1234/camera/5/config",
        200,
        json!({"camera": [{
            "id": 5, "name": "porch", "thumbnail": "/t/porch",
            "temperature": 70, "wifi_strength": -50
        }]}),
    );
}
