// Session manager
//
// Owns the auth token and the account/client identifiers for one cloud
// account. Every authenticated call goes through `request()`, which
// applies the one-shot re-login policy: a 401 triggers exactly one
// re-login (single-flight across concurrent callers) and exactly one
// replay of the original request. The raw token never leaves this module.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::Utc;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{
    CredentialStore, LoginCredentials, LoginOutcome, LoginResponse, SessionInfo,
    StoredCredential, VerifyResponse,
};
use crate::endpoints::Endpoints;
use crate::error::Error;
use crate::transport::{ApiRequest, ApiResponse, Transport};

const TOKEN_HEADER: &str = "token_auth";
const CLIENT_NAME: &str = "blinkly";
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Coarse session state, for callers that only need to branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unauthenticated,
    PendingVerification,
    Authenticated,
}

/// A live token plus the host it is valid against.
struct Session {
    info: SessionInfo,
    token: SecretString,
    endpoints: Endpoints,
    /// Bumped every time a new token is stored; lets re-login waiters
    /// tell whether someone else already replaced the token they saw.
    generation: u64,
}

enum SessionState {
    Unauthenticated,
    PendingVerification(Arc<Session>),
    Authenticated(Arc<Session>),
}

/// Authentication session for one account.
///
/// Shared by reference (`Arc<SessionManager>`) with every component that
/// issues cloud calls. Reads of the current token are lock-free; only the
/// re-login path takes a lock, and only for the duration of the login call.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    base_url: Option<Url>,
    store: Option<Arc<dyn CredentialStore>>,
    credentials: ArcSwapOption<LoginCredentials>,
    state: ArcSwap<SessionState>,
    next_generation: AtomicU64,
    relogin_gate: Mutex<()>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: None,
            store: None,
            credentials: ArcSwapOption::empty(),
            state: ArcSwap::from_pointee(SessionState::Unauthenticated),
            next_generation: AtomicU64::new(1),
            relogin_gate: Mutex::new(()),
        }
    }

    /// Send every call (login included) to `base_url` instead of the
    /// production hosts.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Persist the credential record after every successful login.
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    // ── State accessors ──────────────────────────────────────────────

    pub fn status(&self) -> SessionStatus {
        match **self.state.load() {
            SessionState::Unauthenticated => SessionStatus::Unauthenticated,
            SessionState::PendingVerification(_) => SessionStatus::PendingVerification,
            SessionState::Authenticated(_) => SessionStatus::Authenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    /// Identifiers of the current (possibly pending) session.
    pub fn session_info(&self) -> Option<SessionInfo> {
        match &**self.state.load() {
            SessionState::Unauthenticated => None,
            SessionState::PendingVerification(s) | SessionState::Authenticated(s) => {
                Some(s.info.clone())
            }
        }
    }

    /// URL builder for the authenticated session's host.
    pub fn endpoints(&self) -> Result<Endpoints, Error> {
        self.active().map(|s| s.endpoints.clone())
    }

    /// Account id of the authenticated session.
    pub fn account_id(&self) -> Result<String, Error> {
        self.active().map(|s| s.info.account_id.clone())
    }

    /// The usable session. A login waiting on its PIN is not usable and
    /// reports `TwoFactorRequired`, the pending-verification form of
    /// `NotAuthenticated`.
    fn active(&self) -> Result<Arc<Session>, Error> {
        match &**self.state.load() {
            SessionState::Authenticated(s) => Ok(Arc::clone(s)),
            SessionState::PendingVerification(_) => Err(Error::TwoFactorRequired),
            SessionState::Unauthenticated => Err(Error::NotAuthenticated),
        }
    }

    // ── Login lifecycle ──────────────────────────────────────────────

    /// Log in with `credentials`, replacing any existing session.
    ///
    /// On `VerificationRequired` the session is pending until
    /// [`submit_2fa`](Self::submit_2fa) succeeds.
    pub async fn login(&self, credentials: LoginCredentials) -> Result<LoginOutcome, Error> {
        let credentials = Arc::new(credentials);
        self.credentials.store(Some(Arc::clone(&credentials)));

        let _gate = self.relogin_gate.lock().await;
        match self.request_login(&credentials, false).await {
            Ok((session, false)) => {
                let info = session.info.clone();
                info!(account_id = %info.account_id, tier = %info.tier, "logged in");
                self.state
                    .store(Arc::new(SessionState::Authenticated(Arc::clone(&session))));
                self.persist(&credentials, &session);
                Ok(LoginOutcome::Authenticated(info))
            }
            Ok((session, true)) => {
                let info = session.info.clone();
                info!(account_id = %info.account_id, "login pending two-factor verification");
                self.state
                    .store(Arc::new(SessionState::PendingVerification(session)));
                Ok(LoginOutcome::VerificationRequired(info))
            }
            Err(e) => {
                self.state.store(Arc::new(SessionState::Unauthenticated));
                Err(e)
            }
        }
    }

    /// Complete a pending login with the emailed PIN.
    ///
    /// An invalid PIN is an `Authentication` error and leaves the session
    /// pending so the caller can retry.
    pub async fn submit_2fa(&self, code: &str) -> Result<SessionInfo, Error> {
        let session = match &**self.state.load() {
            SessionState::PendingVerification(s) => Arc::clone(s),
            SessionState::Authenticated(s) => return Ok(s.info.clone()),
            SessionState::Unauthenticated => return Err(Error::NotAuthenticated),
        };

        let url = session
            .endpoints
            .verify_pin(&session.info.account_id, &session.info.client_id)?;
        let request = self
            .authorize(ApiRequest::post(url), &session)?
            .with_body(json!({ "pin": code }));

        let response = match self.transport.send(request).await {
            Ok(response) => check_status(response)?,
            Err(Error::SessionExpired) => {
                return Err(Error::Authentication {
                    message: "verification rejected".into(),
                });
            }
            Err(e) => return Err(e),
        };

        let verdict: VerifyResponse = decode(response.json)?;
        if !verdict.valid {
            return Err(Error::Authentication {
                message: verdict
                    .message
                    .unwrap_or_else(|| "invalid verification code".into()),
            });
        }

        info!(account_id = %session.info.account_id, "two-factor verification accepted");
        self.state
            .store(Arc::new(SessionState::Authenticated(Arc::clone(&session))));
        if let Some(credentials) = self.credentials.load_full() {
            self.persist(&credentials, &session);
        }
        Ok(session.info.clone())
    }

    /// Set the credentials used for re-login without logging in.
    ///
    /// Call before [`restore`](Self::restore) when the persisted record
    /// carries no password.
    pub fn set_credentials(&self, credentials: LoginCredentials) {
        self.credentials.store(Some(Arc::new(credentials)));
    }

    /// Seed the session from a persisted record. No network call.
    ///
    /// Re-login uses the record's password when it has one, otherwise the
    /// credentials from [`set_credentials`](Self::set_credentials). Either
    /// way the record's `unique_id` is kept. With neither, the first 401
    /// is fatal.
    pub fn restore(&self, stored: &StoredCredential) -> Result<SessionInfo, Error> {
        let endpoints = self.endpoints_for(&stored.tier)?;
        let relogin = match (&stored.password, self.credentials.load_full()) {
            (Some(password), _) => Some(LoginCredentials::new(stored.email.clone(), password.clone())),
            (None, Some(seeded)) => Some((*seeded).clone()),
            (None, None) => {
                warn!("restored session has no password; re-login will not be possible");
                None
            }
        };
        if let Some(credentials) = relogin {
            self.credentials.store(Some(Arc::new(
                credentials.with_unique_id(stored.unique_id.clone()),
            )));
        }
        let session = Session {
            info: stored.session_info(),
            token: stored.token.clone(),
            endpoints,
            generation: self.next_generation.fetch_add(1, Ordering::AcqRel),
        };
        debug!(account_id = %session.info.account_id, "session restored");
        let info = session.info.clone();
        self.state
            .store(Arc::new(SessionState::Authenticated(Arc::new(session))));
        Ok(info)
    }

    /// Restore from the attached credential store, if it holds a record.
    pub fn restore_from_store(&self) -> Result<Option<SessionInfo>, Error> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        match store.load()? {
            Some(stored) => self.restore(&stored).map(Some),
            None => Ok(None),
        }
    }

    /// Drop the session. The server-side logout is best-effort.
    pub async fn logout(&self) {
        let previous = self.state.swap(Arc::new(SessionState::Unauthenticated));
        self.credentials.store(None);
        if let SessionState::Authenticated(session) = &*previous {
            let result = session
                .endpoints
                .logout(&session.info.account_id, &session.info.client_id)
                .and_then(|url| self.authorize(ApiRequest::post(url), session));
            if let Ok(request) = result {
                if let Err(e) = self.transport.send(request).await {
                    debug!(error = %e, "server-side logout failed");
                }
            }
        }
        info!("logged out");
    }

    // ── Authenticated requests ───────────────────────────────────────

    /// Issue an authenticated call, returning the 2xx response.
    ///
    /// On a 401 the session re-logs in once and replays the request once.
    /// A second 401 leaves the session unauthenticated and returns
    /// `Error::Authentication`. Fails fast without any network call when
    /// there is no usable session: `NotAuthenticated`, or
    /// `TwoFactorRequired` while a login is waiting on its PIN.
    pub async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<ApiResponse, Error> {
        let session = self.active()?;
        debug!("{method} {url}");

        match self.send(&session, &method, &url, body.as_ref()).await {
            Err(Error::SessionExpired) => {}
            other => return other.and_then(check_status),
        }

        debug!(%url, "token rejected, re-authenticating");
        let session = self.relogin(&session).await?;

        match self.send(&session, &method, &url, body.as_ref()).await {
            Err(Error::SessionExpired) => {
                warn!(%url, "token rejected again after re-login");
                self.state.store(Arc::new(SessionState::Unauthenticated));
                Err(Error::Authentication {
                    message: "session rejected after re-login".into(),
                })
            }
            other => other.and_then(check_status),
        }
    }

    /// `GET` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        let response = self.request(Method::GET, url, None).await?;
        decode(response.json)
    }

    async fn send(
        &self,
        session: &Session,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<ApiResponse, Error> {
        let mut request = self.authorize(ApiRequest::new(method.clone(), url.clone()), session)?;
        request.body = body.cloned();
        self.transport.send(request).await
    }

    fn authorize(&self, request: ApiRequest, session: &Session) -> Result<ApiRequest, Error> {
        let value = HeaderValue::from_str(session.token.expose_secret()).map_err(|_| {
            Error::Authentication {
                message: "token is not a valid header value".into(),
            }
        })?;
        Ok(request.with_header(HeaderName::from_static(TOKEN_HEADER), value, true))
    }

    /// Single-flight re-login. The first caller holding a stale token logs
    /// in; callers queued behind it reuse the token it stored.
    async fn relogin(&self, stale: &Session) -> Result<Arc<Session>, Error> {
        let _gate = self.relogin_gate.lock().await;

        match &**self.state.load() {
            SessionState::Authenticated(current) if current.generation != stale.generation => {
                debug!("reusing token from concurrent re-login");
                return Ok(Arc::clone(current));
            }
            SessionState::Authenticated(_) => {}
            SessionState::PendingVerification(_) => return Err(Error::TwoFactorRequired),
            SessionState::Unauthenticated => {
                return Err(Error::Authentication {
                    message: "re-login failed".into(),
                });
            }
        }

        let Some(credentials) = self.credentials.load_full() else {
            self.state.store(Arc::new(SessionState::Unauthenticated));
            return Err(Error::Authentication {
                message: "no credentials available for re-login".into(),
            });
        };

        match self.request_login(&credentials, true).await {
            Ok((session, false)) => {
                info!(account_id = %session.info.account_id, "re-authenticated");
                self.state
                    .store(Arc::new(SessionState::Authenticated(Arc::clone(&session))));
                self.persist(&credentials, &session);
                Ok(session)
            }
            Ok((session, true)) => {
                warn!("re-login requires two-factor verification");
                self.state
                    .store(Arc::new(SessionState::PendingVerification(session)));
                Err(Error::TwoFactorRequired)
            }
            Err(e) => {
                warn!(error = %e, "re-login failed");
                self.state.store(Arc::new(SessionState::Unauthenticated));
                Err(e)
            }
        }
    }

    /// POST the login body. Returns the new session and whether it still
    /// needs two-factor verification.
    async fn request_login(
        &self,
        credentials: &LoginCredentials,
        reauth: bool,
    ) -> Result<(Arc<Session>, bool), Error> {
        let login_host = match &self.base_url {
            Some(base) => Endpoints::new(base.clone()),
            None => Endpoints::login_host()?,
        };
        let body = json!({
            "email": credentials.email,
            "password": credentials.password.expose_secret(),
            "unique_id": credentials.unique_id,
            "device_id": CLIENT_NAME,
            "client_name": CLIENT_NAME,
            "reauth": reauth,
        });
        let request = ApiRequest::post(login_host.login()?).with_body(body);

        let response = match self.transport.send(request).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                return Err(Error::Authentication {
                    message: format!(
                        "login rejected (HTTP {}): {}",
                        response.status,
                        error_message(&response.json)
                    ),
                });
            }
            Err(Error::SessionExpired) => {
                return Err(Error::Authentication {
                    message: "invalid credentials".into(),
                });
            }
            Err(e) => return Err(e),
        };

        let parsed: LoginResponse = decode(response.json)?;
        let needs_verification = parsed.account.verification_required();
        let session = Session {
            endpoints: self.endpoints_for(&parsed.account.tier)?,
            info: SessionInfo {
                account_id: parsed.account.account_id,
                client_id: parsed.account.client_id,
                tier: parsed.account.tier,
                issued_at: Utc::now(),
            },
            token: SecretString::from(parsed.auth.token),
            generation: self.next_generation.fetch_add(1, Ordering::AcqRel),
        };
        Ok((Arc::new(session), needs_verification))
    }

    fn endpoints_for(&self, tier: &str) -> Result<Endpoints, Error> {
        match &self.base_url {
            Some(base) => Ok(Endpoints::new(base.clone())),
            None => Endpoints::for_tier(tier),
        }
    }

    fn persist(&self, credentials: &LoginCredentials, session: &Session) {
        let Some(store) = &self.store else { return };
        let record = StoredCredential {
            email: credentials.email.clone(),
            password: Some(credentials.password.clone()),
            unique_id: credentials.unique_id.clone(),
            account_id: session.info.account_id.clone(),
            client_id: session.info.client_id.clone(),
            tier: session.info.tier.clone(),
            token: session.token.clone(),
            issued_at: session.info.issued_at,
        };
        if let Err(e) = store.save(&record) {
            warn!(error = %e, "failed to persist credentials");
        }
    }
}

// ── Response helpers ─────────────────────────────────────────────────

fn check_status(response: ApiResponse) -> Result<ApiResponse, Error> {
    match response.status {
        s if (200..300).contains(&s) => Ok(response),
        429 => Err(Error::RateLimited {
            retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
        }),
        status => Err(Error::Http {
            status,
            message: error_message(&response.json),
        }),
    }
}

fn error_message(body: &Value) -> String {
    match body {
        Value::Null => "no body".into(),
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| body.to_string(), str::to_owned),
        other => other.to_string(),
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T, Error> {
    serde_json::from_value::<T>(body.clone()).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: body.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;

    /// Rejects the `stale` token and mints `fresh` on login.
    #[derive(Default)]
    struct ExpiringTransport {
        logins: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for ExpiringTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
            if request.url.path().ends_with("/login") {
                self.logins.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                return Ok(ApiResponse::new(
                    200,
                    json!({
                        "account": {"account_id": 1, "client_id": 2, "tier": "test"},
                        "auth": {"token": "fresh"}
                    }),
                ));
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let token = request
                .headers
                .get("token_auth")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if token == "fresh" {
                Ok(ApiResponse::new(200, json!({"ok": true})))
            } else {
                Err(Error::SessionExpired)
            }
        }
    }

    fn stored(token: &str) -> StoredCredential {
        StoredCredential {
            email: "user@example.com".into(),
            password: Some(SecretString::from("hunter2".to_owned())),
            unique_id: "uid".into(),
            account_id: "1".into(),
            client_id: "2".into(),
            tier: "test".into(),
            token: SecretString::from(token.to_owned()),
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn concurrent_expiries_share_one_relogin() {
        let transport = Arc::new(ExpiringTransport::default());
        let session = SessionManager::new(transport.clone());
        session.restore(&stored("stale")).unwrap();
        let url = session.endpoints().unwrap().network("9").unwrap();

        let results = futures_util::future::join_all(
            (0..5).map(|_| session.request(Method::GET, url.clone(), None)),
        )
        .await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(transport.logins.load(Ordering::SeqCst), 1);
        // five rejected + five replays
        assert_eq!(transport.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn missing_session_fails_fast() {
        let session = SessionManager::new(Arc::new(ExpiringTransport::default()));
        let url = Url::parse("https://example.invalid/network/1").unwrap();
        let err = session.request(Method::GET, url, None).await.unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));
    }

    #[tokio::test]
    async fn restored_record_without_password_relogs_in_with_seeded_credentials() {
        let transport = Arc::new(ExpiringTransport::default());
        let session = SessionManager::new(transport.clone());
        session.set_credentials(LoginCredentials::new(
            "user@example.com",
            SecretString::from("hunter2".to_owned()),
        ));
        let mut record = stored("stale");
        record.password = None;
        session.restore(&record).unwrap();

        // The persisted installation id wins over the freshly generated one.
        assert_eq!(session.credentials.load_full().unwrap().unique_id, "uid");

        let url = session.endpoints().unwrap().network("9").unwrap();
        session.request(Method::GET, url, None).await.unwrap();

        assert_eq!(transport.logins.load(Ordering::SeqCst), 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restored_record_without_any_password_cannot_relogin() {
        let transport = Arc::new(ExpiringTransport::default());
        let session = SessionManager::new(transport.clone());
        let mut record = stored("stale");
        record.password = None;
        session.restore(&record).unwrap();

        let url = session.endpoints().unwrap().network("9").unwrap();
        let err = session.request(Method::GET, url, None).await.unwrap_err();

        assert!(matches!(err, Error::Authentication { .. }));
        assert_eq!(transport.logins.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn error_message_prefers_message_field() {
        assert_eq!(error_message(&json!({"message": "nope", "code": 3})), "nope");
        assert_eq!(error_message(&Value::Null), "no body");
        assert_eq!(error_message(&json!("plain")), "plain");
    }

    #[test]
    fn rate_limited_status_is_typed() {
        let err = check_status(ApiResponse::new(429, Value::Null)).unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
        let err = check_status(ApiResponse::new(404, json!({"message": "gone"}))).unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
