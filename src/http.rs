use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Map, Value};

use crate::{
    errors::{ApiError, Error, RetryMetadata},
    SERVER_TIMEOUT_HEADER,
};

/// Layered HTTP configuration, set at the client level and overridable per call.
///
/// Two instances combine via [`HttpOptions::merged_with`]; the result is
/// itself a valid `HttpOptions`.
#[derive(Clone, Debug, Default)]
pub struct HttpOptions {
    /// Base URL of the API surface; a single trailing slash is tolerated.
    pub base_url: Option<String>,
    /// API version path segment. An empty string means "no version segment".
    pub api_version: Option<String>,
    /// Ordered headers; later entries override earlier ones on key collision.
    pub headers: Option<HeaderList>,
    /// Overall request timeout, also surfaced to the server as
    /// `X-Server-Timeout` (whole seconds, rounded up).
    pub timeout: Option<Duration>,
    /// JSON fragment merged into every outbound request body.
    pub extra_body: Option<Map<String, Value>>,
    /// Retry policy handed to the execution layer.
    pub retry: Option<RetryPolicy>,
}

impl HttpOptions {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HeaderList::new)
            .set(key.into(), value.into());
        self
    }

    /// Override the overall request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_extra_body(mut self, extra_body: Map<String, Value>) -> Self {
        self.extra_body = Some(extra_body);
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Disable retries.
    pub fn disable_retry(mut self) -> Self {
        self.retry = Some(RetryPolicy::disabled());
        self
    }

    /// Deep-merges `overlay` over `self`, field by field.
    ///
    /// Scalar fields (`base_url`, `api_version`, `timeout`, `extra_body`,
    /// `retry`) are replaced only when the overlay carries a value. Headers
    /// are layered: base headers first, then — when the overlay carries a
    /// timeout — a synthesized `X-Server-Timeout` header, then the overlay
    /// headers, with the last-applied value winning on key collision.
    pub fn merged_with(&self, overlay: Option<&HttpOptions>) -> HttpOptions {
        let Some(overlay) = overlay else {
            return self.clone();
        };

        let mut merged = self.clone();
        if let Some(base_url) = &overlay.base_url {
            merged.base_url = Some(base_url.clone());
        }
        if let Some(api_version) = &overlay.api_version {
            merged.api_version = Some(api_version.clone());
        }
        if let Some(timeout) = overlay.timeout {
            merged.timeout = Some(timeout);
        }
        if let Some(extra_body) = &overlay.extra_body {
            merged.extra_body = Some(extra_body.clone());
        }
        if let Some(retry) = &overlay.retry {
            merged.retry = Some(retry.clone());
        }

        if overlay.timeout.is_some() || overlay.headers.is_some() {
            let mut headers = self.headers.clone().unwrap_or_default();
            if let Some(timeout) = overlay.timeout {
                headers.set(SERVER_TIMEOUT_HEADER, timeout_in_seconds(timeout));
            }
            if let Some(overlay_headers) = &overlay.headers {
                for entry in overlay_headers.iter() {
                    headers.set(entry.key.clone(), entry.value.clone());
                }
            }
            merged.headers = Some(headers);
        }

        merged
    }
}

/// Whole seconds, rounded up, as a decimal string.
fn timeout_in_seconds(timeout: Duration) -> String {
    timeout.as_millis().div_ceil(1000).to_string()
}

/// Retry/backoff configuration handed to the execution layer.
///
/// Defaults: 3 attempts, jittered exponential backoff between 300ms and 5s,
/// retrying on 408, 429 and the common 5xx statuses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(300),
            max_backoff: Duration::from_secs(5),
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Whether the given status code should trigger a retry.
    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }

    /// Whether the given transport error should trigger a retry.
    pub fn should_retry_error(&self, err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request()
    }

    /// Jittered exponential backoff for the given attempt (1-indexed).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = if attempt == 0 {
            0
        } else {
            (attempt - 1).min(10)
        };
        let base = self.base_backoff.saturating_mul(2u32.saturating_pow(exp));
        let capped = std::cmp::min(base, self.max_backoff);
        let jitter = 0.5 + fastrand::f64(); // 0.5x .. 1.5x
        let seconds = (capped.as_secs_f64() * jitter).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(seconds)
    }
}

/// Ordered header mapping; setting an existing key keeps its position and
/// replaces the value (keys compare case-insensitively).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderList(Vec<HeaderEntry>);

impl HeaderList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let entry = HeaderEntry::new(key.into(), value.into());
        match self
            .0
            .iter_mut()
            .find(|existing| existing.key.eq_ignore_ascii_case(&entry.key))
        {
            Some(existing) => existing.value = entry.value,
            None => self.0.push(entry),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|entry| entry.key.eq_ignore_ascii_case(key))
            .map(|entry| entry.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut list = HeaderList::new();
        for (key, value) in iter {
            list.set(key, value);
        }
        list
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(key: String, value: String) -> Self {
        Self { key, value }
    }
}

/// Maps a terminal non-2xx response body to an [`ApiError`], understanding
/// the Google error envelope `{"error": {"code", "message", "status"}}`.
pub(crate) fn parse_api_error_parts(
    status: StatusCode,
    body: String,
    retries: Option<RetryMetadata>,
) -> Error {
    let status_code = status.as_u16();
    let status_text = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();

    if body.is_empty() {
        return ApiError {
            status: status_code,
            code: None,
            message: status_text,
            retries,
            raw_body: None,
        }
        .into();
    }

    if let Ok(value) = serde_json::from_str::<Value>(&body) {
        if let Some(err_obj) = value.get("error").and_then(|v| v.as_object()) {
            let code = err_obj
                .get("status")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let message = err_obj
                .get("message")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| status_text.clone());
            let status_override = err_obj
                .get("code")
                .and_then(|v| v.as_u64())
                .map(|v| v as u16)
                .unwrap_or(status_code);
            return ApiError {
                status: status_override,
                code,
                message,
                retries,
                raw_body: Some(body.clone()),
            }
            .into();
        }
    }

    ApiError {
        status: status_code,
        code: None,
        message: body.clone(),
        retries,
        raw_body: Some(body),
    }
    .into()
}
