use thiserror::Error;

/// Top-level error type for the `blinkly-api` crate.
///
/// Covers authentication, transport, and payload failures. `blinkly-core`
/// maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login or re-login failed (wrong credentials, account locked, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The cloud demands a second factor before the session is usable.
    #[error("Two-factor verification pending -- submit the emailed PIN")]
    TwoFactorRequired,

    /// No usable session (never logged in, logged out, or 2FA pending).
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The token was rejected (HTTP 401). Raised by the transport and
    /// consumed by the session's one-shot re-login path.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Rate limited by the cloud API.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Non-success HTTP status other than 401/429.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Persistence ─────────────────────────────────────────────────
    /// The credential store could not load or save a record.
    #[error("Credential store error: {0}")]
    CredentialStore(String),
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Returns `true` for failures that leave the caller without a session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::TwoFactorRequired
                | Self::NotAuthenticated
                | Self::SessionExpired
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::SessionExpired => Some(401),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_session_expired_triggers_relogin() {
        assert!(Error::SessionExpired.is_auth_expired());
        assert!(
            !Error::Authentication {
                message: "bad password".into()
            }
            .is_auth_expired()
        );
        assert!(!Error::NotAuthenticated.is_auth_expired());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Http {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());
        assert_eq!(err.status(), Some(503));

        let err = Error::Http {
            status: 404,
            message: "missing".into(),
        };
        assert!(!err.is_transient());
    }
}
