// ── Logging setup ──
//
// One-shot `tracing` subscriber for binaries embedding the blinkly crates.
// Libraries only emit events; installing a subscriber is the embedder's
// call, made once near the top of `main`.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::ConfigError;

/// Environment variable holding the filter directive.
pub const LOG_ENV: &str = "BLINKLY_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, compact lines on stderr.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Build the filter from `BLINKLY_LOG`, falling back to `default_directive`.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(format: LogFormat, default_directive: &str) -> Result<(), ConfigError> {
    let filter = env_filter(default_directive);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_current_span(false),
            )
            .try_init(),
    };
    result.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn format_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            log_format: LogFormat,
        }
        let w: Wrapper = toml::from_str(r#"log_format = "json""#).unwrap();
        assert_eq!(w.log_format, LogFormat::Json);
    }

    #[test]
    fn second_init_is_an_error() {
        let _ = init_logging(LogFormat::Pretty, "warn");
        let second = init_logging(LogFormat::Json, "warn");
        assert!(matches!(second, Err(ConfigError::Logging(_))));
    }
}
