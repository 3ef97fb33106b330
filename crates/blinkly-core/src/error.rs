// ── Core error types ──
//
// User-facing errors from blinkly-core. Consumers never see raw
// transport failures; the `From<blinkly_api::Error>` impl translates
// them into domain variants.

use thiserror::Error;

use crate::device::{Capability, ProductType};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Not authenticated -- log in first")]
    NotAuthenticated,

    #[error("Two-factor verification pending -- submit the emailed PIN")]
    TwoFactorRequired,

    // ── Transport errors ─────────────────────────────────────────────
    #[error("Cannot reach the cloud: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Unknown device type: {device_type}")]
    UnknownDeviceType { device_type: String },

    #[error("{product_type} devices do not support {capability}")]
    CapabilityUnsupported {
        capability: Capability,
        product_type: ProductType,
    },

    #[error("Device {name} is stale: its last refresh failed")]
    StaleDevice { name: String },

    #[error("Device not found: {name}")]
    DeviceNotFound { name: String },

    #[error("Hub not found: {identifier}")]
    HubNotFound { identifier: String },

    // ── Input / config errors ────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this error leaves the account without a usable session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::NotAuthenticated | Self::TwoFactorRequired
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<blinkly_api::Error> for CoreError {
    fn from(err: blinkly_api::Error) -> Self {
        match err {
            blinkly_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            blinkly_api::Error::SessionExpired => CoreError::AuthenticationFailed {
                message: "Session expired -- re-authentication required".into(),
            },
            blinkly_api::Error::TwoFactorRequired => CoreError::TwoFactorRequired,
            blinkly_api::Error::NotAuthenticated => CoreError::NotAuthenticated,
            blinkly_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            blinkly_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            blinkly_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            blinkly_api::Error::RateLimited { retry_after_secs } => {
                CoreError::RateLimited { retry_after_secs }
            }
            blinkly_api::Error::Http { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            blinkly_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            blinkly_api::Error::CredentialStore(message) => CoreError::Config { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_errors_keep_status() {
        let err = CoreError::from(blinkly_api::Error::Http {
            status: 404,
            message: "missing".into(),
        });
        assert!(matches!(err, CoreError::Api { status: Some(404), .. }));
    }

    #[test]
    fn session_errors_are_auth_failures() {
        assert!(CoreError::from(blinkly_api::Error::NotAuthenticated).is_auth_failure());
        assert!(CoreError::from(blinkly_api::Error::TwoFactorRequired).is_auth_failure());
        assert!(!CoreError::from(blinkly_api::Error::RateLimited { retry_after_secs: 1 }).is_auth_failure());
    }

    #[test]
    fn unsupported_capability_message_names_both_sides() {
        let err = CoreError::CapabilityUnsupported {
            capability: Capability::Snooze,
            product_type: ProductType::Catalina,
        };
        assert_eq!(err.to_string(), "catalina devices do not support snooze");
    }
}
