//! HTTP plumbing shared by every cloud adapter.

use crate::error::RewriteError;
use reqwest::{Client, Response, StatusCode};
use std::borrow::Cow;
use std::time::Duration;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

pub fn build_provider_client_with_timeout(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Validate a configured base URL and strip any trailing slash.
pub fn normalize_base_url(raw: &str) -> Result<String, RewriteError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed)
        .map_err(|e| RewriteError::InvalidEndpoint(format!("{trimmed}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RewriteError::InvalidEndpoint(format!(
            "{trimmed}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    Ok(trimmed.to_string())
}

pub fn map_transport_error(error: &reqwest::Error) -> RewriteError {
    if error.is_timeout() {
        RewriteError::NetworkTimeout
    } else if error.is_decode() {
        RewriteError::invalid_response(error.to_string())
    } else {
        RewriteError::Network(sanitize_error_text(&error.to_string()))
    }
}

/// Pass a 2xx response through; turn anything else into the matching error.
pub async fn check_status(backend: &str, response: Response) -> Result<Response, RewriteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        return Err(RewriteError::RateLimited {
            backend: backend.to_string(),
            retry_after_secs,
        });
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!(backend, status = status.as_u16(), "backend returned error status");
    Err(RewriteError::Server {
        status: status.as_u16(),
        message: extract_error_message(&body),
    })
}

/// Best-effort message from an error body: `error.message`, then `message`,
/// then a bare string `error`.
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let candidate = value
        .pointer("/error/message")
        .and_then(serde_json::Value::as_str)
        .or_else(|| value.get("message").and_then(serde_json::Value::as_str))
        .or_else(|| value.get("error").and_then(serde_json::Value::as_str))?;
    let sanitized = sanitize_error_text(candidate);
    (!sanitized.trim().is_empty()).then_some(sanitized)
}

const SECRET_PREFIXES: [&str; 6] = ["sk-ant-", "sk-", "AIza", "ya29.", "Bearer ", "api_key="];

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Redact credential-looking tokens.
pub fn scrub_secrets(input: &str) -> Cow<'_, str> {
    if !SECRET_PREFIXES.iter().any(|prefix| input.contains(prefix)) {
        return Cow::Borrowed(input);
    }

    let mut scrubbed = input.to_string();
    for prefix in SECRET_PREFIXES {
        let mut from = 0;
        while let Some(rel) = scrubbed[from..].find(prefix) {
            let start = from + rel;
            let token_start = start + prefix.len();
            let token_len: usize = scrubbed[token_start..]
                .chars()
                .take_while(|c| is_secret_char(*c))
                .map(char::len_utf8)
                .sum();
            if token_len == 0 {
                from = token_start;
                continue;
            }
            scrubbed.replace_range(start..token_start + token_len, "[REDACTED]");
            from = start + "[REDACTED]".len();
        }
    }
    Cow::Owned(scrubbed)
}

/// Scrub secrets and cap length for inclusion in user-facing messages.
pub fn sanitize_error_text(input: &str) -> String {
    let scrubbed = scrub_secrets(input);
    if scrubbed.chars().count() <= MAX_ERROR_MESSAGE_CHARS {
        return scrubbed.into_owned();
    }
    let truncated: String = scrubbed.chars().take(MAX_ERROR_MESSAGE_CHARS).collect();
    format!("{truncated}...")
}
