//! Process configuration read from the environment (and `.env` when present).

use std::net::SocketAddr;

use shopledger_observability::LogFormat;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid BIND_ADDR '{0}'")]
    InvalidBindAddr(String),

    #[error("invalid LOG_FORMAT: {0}")]
    InvalidLogFormat(#[from] shopledger_observability::ParseLogFormatError),

    #[error("JWT_SECRET must not be empty")]
    EmptyJwtSecret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub log_format: LogFormat,
    /// `JWT_SECRET` was unset and the insecure development secret is in use.
    pub dev_jwt_secret: bool,
}

impl ApiConfig {
    /// Load `.env` (if any), then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_raw = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(bind_raw.clone()))?;

        let (jwt_secret, dev_jwt_secret) = match lookup("JWT_SECRET") {
            Some(s) if s.trim().is_empty() => return Err(ConfigError::EmptyJwtSecret),
            Some(s) => (s, false),
            None => (DEV_JWT_SECRET.to_string(), true),
        };

        let log_format = match lookup("LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            log_format,
            dev_jwt_secret,
        })
    }
}
