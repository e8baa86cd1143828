//! Classification of raw failures and the retry policy.
//!
//! The [`ErrorHandler`] turns every [`TransportFailure`] into exactly one
//! [`NormalizedError`] and decides whether the pipeline may try again.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::clock::Clock;
use crate::configuration::ClientConfig;
use crate::error::{ErrorCode, NormalizedError, TransportFailure};

pub const PROGRAM_CONTEXT_ERROR_HEADER: &str = "x-program-context-error";
const PROGRAM_CONTEXT_ERROR_CODES: [&str; 2] = ["PROGRAM_CONTEXT_ERROR", "INVALID_PROGRAM_CONTEXT"];
const MAX_DETAIL_BODY_LEN: usize = 2048;

/// Exponential backoff bounded by a retry count and a maximum delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let max_retries = if config.enable_retry { config.max_retries } else { 0 };
        Self::new(max_retries, config.retry_delay(), config.max_retry_delay())
    }

    /// Delay before retry number `attempt + 1`: `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Transient classifications eligible for automatic retry.
    pub fn is_retryable(code: ErrorCode) -> bool {
        matches!(
            code,
            ErrorCode::NetworkError | ErrorCode::ServerError | ErrorCode::RateLimitError
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

pub struct ErrorHandler {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ErrorHandler {
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Map a raw failure onto the closed error taxonomy.
    pub fn classify(&self, failure: &TransportFailure, path: &str) -> NormalizedError {
        let now = self.clock.now();
        match failure {
            TransportFailure::Network(message) => NormalizedError::new(
                ErrorCode::NetworkError,
                format!("Network error: {}", message),
                0,
                path,
                now,
            ),
            TransportFailure::Offline => NormalizedError::new(
                ErrorCode::NetworkError,
                "The network is offline",
                0,
                path,
                now,
            )
            .with_details(json!({ "offline": true })),
            TransportFailure::Timeout(after) => NormalizedError::new(
                ErrorCode::TimeoutError,
                "The server took too long to respond",
                0,
                path,
                now,
            )
            .with_details(json!({ "timeoutMs": after.as_millis() as u64 })),
            TransportFailure::Status {
                status,
                headers,
                body,
            } => self.classify_status(*status, headers, body, path),
            TransportFailure::Decode(message) => NormalizedError::new(
                ErrorCode::UnknownError,
                format!("Failed to decode response: {}", message),
                0,
                path,
                now,
            ),
            TransportFailure::InvalidRequest(message) => NormalizedError::new(
                ErrorCode::UnknownError,
                format!("Invalid request: {}", message),
                0,
                path,
                now,
            ),
            TransportFailure::Cancelled => NormalizedError::new(
                ErrorCode::UnknownError,
                "The request was cancelled because the client shut down",
                0,
                path,
                now,
            ),
        }
    }

    fn classify_status(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        body: &str,
        path: &str,
    ) -> NormalizedError {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let context_rejected = headers.contains_key(PROGRAM_CONTEXT_ERROR_HEADER)
            || parsed
                .as_ref()
                .and_then(|v| v.get("code"))
                .and_then(Value::as_str)
                .is_some_and(|code| PROGRAM_CONTEXT_ERROR_CODES.contains(&code));

        let code = match status.as_u16() {
            400 | 403 if context_rejected => ErrorCode::ProgramContextError,
            400 | 422 => ErrorCode::ValidationError,
            401 => ErrorCode::AuthenticationError,
            403 => ErrorCode::AuthorizationError,
            404 | 410 => ErrorCode::NotFoundError,
            409 => ErrorCode::ConflictError,
            429 => ErrorCode::RateLimitError,
            500..=599 => ErrorCode::ServerError,
            _ => ErrorCode::UnknownError,
        };

        let message = parsed
            .as_ref()
            .and_then(extract_message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
            });

        let mut details = match parsed {
            Some(value) => Some(value),
            None if body.trim().is_empty() => None,
            None => Some(Value::String(body.chars().take(MAX_DETAIL_BODY_LEN).collect())),
        };

        if let Some(retry_after) = parse_retry_after(headers) {
            let retry_after_ms = retry_after.as_millis() as u64;
            details = Some(match details {
                Some(Value::Object(mut map)) => {
                    map.insert("retryAfterMs".to_string(), json!(retry_after_ms));
                    Value::Object(map)
                }
                Some(other) => json!({ "body": other, "retryAfterMs": retry_after_ms }),
                None => json!({ "retryAfterMs": retry_after_ms }),
            });
        }

        trace!("Classified HTTP {} on {} as {}", status, path, code);

        let error = NormalizedError::new(code, message, status.as_u16(), path, self.clock.now());
        match details {
            Some(details) => error.with_details(details),
            None => error,
        }
    }

    /// Whether retry number `attempt + 1` is allowed for this error.
    pub fn should_retry(&self, error: &NormalizedError, attempt: u32) -> bool {
        RetryPolicy::is_retryable(error.code) && attempt < self.policy.max_retries
    }

    /// Wait before the next attempt, honouring a server `Retry-After`.
    pub fn backoff(&self, error: &NormalizedError, attempt: u32) -> Duration {
        let computed = self.policy.delay_for(attempt);
        match error.retry_after() {
            Some(requested) => computed.max(requested).min(self.policy.max_delay),
            None => computed,
        }
    }
}

fn extract_message(body: &Value) -> Option<String> {
    ["message", "error_description", "error"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
