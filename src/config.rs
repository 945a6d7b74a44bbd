//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Bot configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram Bot API token.
    pub bot_token: SecretString,
    /// Identity allowed to trigger broadcasts.
    pub operator_id: String,
    /// Chat whose membership gates provisioning (`@name` or numeric id).
    pub gate_chat_id: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Base URL of the mailbox provider API.
    pub provider_base_url: String,
    /// Timeout applied to every outbound HTTP call.
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Required: `TELEGRAM_BOT_TOKEN`, `MAILGATE_OPERATOR_ID`,
    /// `MAILGATE_GATE_CHAT_ID`. Everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = require_env("TELEGRAM_BOT_TOKEN")?;
        let operator_id = require_env("MAILGATE_OPERATOR_ID")?;
        let gate_chat_id = require_env("MAILGATE_GATE_CHAT_ID")?;

        let db_path = std::env::var("MAILGATE_DB_PATH")
            .unwrap_or_else(|_| "./data/mailgate.db".to_string());

        let provider_base_url = std::env::var("MAILTM_BASE_URL")
            .unwrap_or_else(|_| "https://api.mail.tm".to_string());

        let http_timeout = match std::env::var("MAILGATE_HTTP_TIMEOUT_SECS") {
            Ok(raw) => parse_timeout_secs(&raw)?,
            Err(_) => Duration::from_secs(30),
        };

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            operator_id,
            gate_chat_id,
            db_path: PathBuf::from(db_path),
            provider_base_url,
            http_timeout,
        })
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

/// Parse a timeout in whole seconds. Zero is rejected: every outbound
/// call must have a finite, nonzero bound.
fn parse_timeout_secs(raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: "MAILGATE_HTTP_TIMEOUT_SECS".to_string(),
        message: format!("expected an integer number of seconds, got {raw:?}"),
    })?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: "MAILGATE_HTTP_TIMEOUT_SECS".to_string(),
            message: "timeout must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
