// Transport boundary and the reqwest-backed implementation.
//
// Everything above this module talks to the cloud through the
// `Transport` trait: one request in, status + JSON out, with HTTP 401
// surfaced as `Error::SessionExpired` so the session layer can apply
// its one-shot re-login policy. Tests substitute an in-process double.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;

const USER_AGENT: &str = concat!("blinkly/", env!("CARGO_PKG_VERSION"));
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Trust an additional CA certificate from the given PEM file
    /// (intercepting proxies, test rigs).
    CustomCa(PathBuf),
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        if let TlsMode::CustomCa(path) = &self.tls {
            let cert_pem = std::fs::read(path)
                .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&cert_pem)
                .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

// ── Request / response ───────────────────────────────────────────────

/// A single outbound API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a header. Sensitive values are redacted from `Debug` output.
    pub fn with_header(mut self, name: HeaderName, mut value: HeaderValue, sensitive: bool) -> Self {
        value.set_sensitive(sensitive);
        self.headers.insert(name, value);
        self
    }
}

/// Status and decoded JSON body of a completed call.
///
/// Bodies that are empty decode to `Value::Null`; non-JSON bodies on
/// error statuses are kept as `Value::String`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub json: Value,
}

impl ApiResponse {
    pub fn new(status: u16, json: Value) -> Self {
        Self { status, json }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ── Transport trait ──────────────────────────────────────────────────

/// Single-method contract for issuing requests to the cloud.
///
/// Implementations must return `Err(Error::SessionExpired)` for HTTP 401
/// and `Ok` for every other status; status interpretation belongs to
/// the session layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error>;
}

/// `Transport` over a pooled `reqwest::Client`.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: config.build_client()?,
        })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::SessionExpired);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(Error::RateLimited { retry_after_secs });
        }

        let body = resp.text().await?;
        trace!(status = status.as_u16(), len = body.len(), "response received");

        Ok(ApiResponse::new(status.as_u16(), decode_body(status, body)?))
    }
}

/// Decode a response body. Success bodies must be JSON (or empty);
/// error bodies fall back to the raw text so the caller can report it.
fn decode_body(status: StatusCode, body: String) -> Result<Value, Error> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str(&body) {
        Ok(json) => Ok(json),
        Err(_) if !status.is_success() => Ok(Value::String(body)),
        Err(e) => {
            let preview = body.chars().take(200).collect::<String>();
            Err(Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            })
        }
    }
}
