use crate::utils::{get_env, get_optional_env};
use std::str::FromStr;

pub const DEFAULT_LANDING_URL: &str = "/";
pub const DEFAULT_ANONYMOUS_QR_LIMIT: i64 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 300;
pub const DEFAULT_RECORDING_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server_address: String,
    /// Postgres URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Where failed redirects land, with `error=<reason>` appended.
    pub landing_url: String,
    /// Hex SHA3-256 of the key the authentication gateway sends in `x-api-key`.
    pub encrypted_api_key: Option<String>,
    pub anonymous_qr_limit: i64,
    pub request_timeout_ms: u64,
    pub recording_timeout_ms: u64,
    pub reconcile_cron: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:8080".into(),
            database_url: None,
            database_max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            landing_url: DEFAULT_LANDING_URL.into(),
            encrypted_api_key: None,
            anonymous_qr_limit: DEFAULT_ANONYMOUS_QR_LIMIT,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            recording_timeout_ms: DEFAULT_RECORDING_TIMEOUT_MS,
            reconcile_cron: None,
        }
    }
}

impl Config {
    /// Reads the process environment. Panics when `SERVER_ADDRESS` is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server_address: get_env("SERVER_ADDRESS"),
            database_url: get_optional_env("DATABASE_URL"),
            database_max_connections: parse_env(
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            )?,
            landing_url: get_optional_env("LANDING_URL")
                .unwrap_or_else(|| DEFAULT_LANDING_URL.into()),
            encrypted_api_key: get_optional_env("ENCRYPTED_API_KEY")
                .map(|key| key.to_ascii_lowercase()),
            anonymous_qr_limit: parse_env("ANONYMOUS_QR_LIMIT", DEFAULT_ANONYMOUS_QR_LIMIT)?,
            request_timeout_ms: parse_env("REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?,
            recording_timeout_ms: parse_env("RECORDING_TIMEOUT_MS", DEFAULT_RECORDING_TIMEOUT_MS)?,
            reconcile_cron: get_optional_env("SCAN_COUNT_RECONCILE_CRON"),
        })
    }

    /// Landing URL carrying a machine-readable failure reason.
    pub fn landing_url_for(&self, reason: &str) -> String {
        let separator = if self.landing_url.contains('?') { '&' } else { '?' };
        format!("{}{}error={}", self.landing_url, separator, reason)
    }
}

fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match get_optional_env(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landing_url_appends_reason() {
        let config = Config::default();
        assert_eq!(config.landing_url_for("not_found"), "/?error=not_found");
        let config = Config {
            landing_url: "https://qr.example/welcome?lang=en".into(),
            ..Config::default()
        };
        assert_eq!(
            config.landing_url_for("inactive"),
            "https://qr.example/welcome?lang=en&error=inactive"
        );
    }
}
