use openai_realtime::signaling::{DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Backend endpoint issuing ephemeral realtime credentials.
    pub credential_endpoint: String,
    /// Bearer token of the signed-in user, forwarded to the credential endpoint.
    pub access_token: Option<String>,
    pub realtime_url: String,
    pub realtime_model: String,
    pub draft_store_dir: PathBuf,
    pub level_poll_interval: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let credential_endpoint = std::env::var("CREDENTIAL_ENDPOINT")
            .map_err(|_| ConfigError::MissingVar("CREDENTIAL_ENDPOINT".to_string()))?;
        let is_http = credential_endpoint.starts_with("http://")
            || credential_endpoint.starts_with("https://");
        if !is_http {
            return Err(ConfigError::InvalidValue(
                "CREDENTIAL_ENDPOINT".to_string(),
                format!("'{}' is not an http(s) URL", credential_endpoint),
            ));
        }

        let access_token = std::env::var("MENTORCALL_ACCESS_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        let realtime_url =
            std::env::var("REALTIME_BASE_URL").unwrap_or_else(|_| DEFAULT_REALTIME_URL.to_string());
        let realtime_model =
            std::env::var("REALTIME_MODEL").unwrap_or_else(|_| DEFAULT_REALTIME_MODEL.to_string());

        let draft_store_dir = std::env::var("DRAFT_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.mentorcall"));

        let poll_str =
            std::env::var("LEVEL_POLL_INTERVAL_MS").unwrap_or_else(|_| "16".to_string());
        let poll_ms = poll_str
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "LEVEL_POLL_INTERVAL_MS".to_string(),
                    format!("'{}' is not a positive number of milliseconds", poll_str),
                )
            })?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            credential_endpoint,
            access_token,
            realtime_url,
            realtime_model,
            draft_store_dir,
            level_poll_interval: Duration::from_millis(poll_ms),
            log_level,
        })
    }
}
