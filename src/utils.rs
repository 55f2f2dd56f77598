use crate::error::ApiError;
use axum::http::HeaderMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::env;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

pub const SHORT_CODE_LENGTH: usize = 8;

pub async fn with_timeout<F: Future>(
    duration_in_mills: u64,
    task: F,
) -> Result<<F as Future>::Output, ApiError> {
    timeout(Duration::from_millis(duration_in_mills), task)
        .await
        .map_err(|elapsed| {
            tracing::error!("Storage call timed out: {}", elapsed);
            ApiError::Timeout
        })
}

pub fn get_env(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("Environment variable {} is required", name))
}

pub fn get_optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Header value as a string; empty values count as absent.
pub fn get_header(name: &str, headers: &HeaderMap) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Accepts absolute http(s) URLs and returns them trimmed but otherwise as given.
pub fn parse_url(text: &str) -> Result<String, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ApiError::Validation("destination_url is required".into()));
    }
    // Stored verbatim and sent back as a Location header.
    if text.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ApiError::Validation("Malformed url".into()));
    }
    match Url::parse(text) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(text.to_string()),
        _ => Err(ApiError::Validation("Malformed url".into())),
    }
}

pub fn generate_short_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHORT_CODE_LENGTH)
        .map(char::from)
        .collect()
}
