//! Error types shared by the campus client.
//!
//! Every failure that leaves the client is a [`NormalizedError`]. Lower layers
//! produce [`TransportFailure`] values which the
//! [`ErrorHandler`](crate::error_handler::ErrorHandler) classifies.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::exit_codes::CampusExitCode;

/// Closed set of error classifications surfaced to callers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The backend could not be reached
    NetworkError,
    /// The call did not finish within its effective timeout
    TimeoutError,
    /// 401, or the session could not be refreshed
    AuthenticationError,
    /// 403
    AuthorizationError,
    /// 422
    ValidationError,
    /// 404
    NotFoundError,
    /// 409
    ConflictError,
    /// 429
    RateLimitError,
    /// 5xx
    ServerError,
    /// The backend rejected the `X-Program-Context` header
    ProgramContextError,
    /// Anything else
    UnknownError,
}

impl ErrorCode {
    /// Deterministic failures: replaying the same request yields the same answer.
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            ErrorCode::ValidationError
                | ErrorCode::NotFoundError
                | ErrorCode::ConflictError
                | ErrorCode::AuthorizationError
                | ErrorCode::ProgramContextError
        )
    }

    /// Exit code used by the `campus` binary for this classification.
    pub fn exit_code(&self) -> CampusExitCode {
        match self {
            ErrorCode::NetworkError | ErrorCode::TimeoutError => CampusExitCode::NetworkError,
            ErrorCode::AuthenticationError | ErrorCode::AuthorizationError => {
                CampusExitCode::AuthError
            }
            ErrorCode::ValidationError => CampusExitCode::DataError,
            ErrorCode::NotFoundError => CampusExitCode::NotFound,
            ErrorCode::RateLimitError | ErrorCode::ServerError => CampusExitCode::TempFail,
            ErrorCode::ConflictError | ErrorCode::ProgramContextError => CampusExitCode::ApiError,
            ErrorCode::UnknownError => CampusExitCode::SoftwareError,
        }
    }
}

/// The single error shape returned across the client boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct NormalizedError {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status, or 0 when no response was received
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub path: String,
}

impl NormalizedError {
    pub fn new(
        code: ErrorCode,
        message: impl Into<String>,
        status: u16,
        path: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            status,
            details: None,
            timestamp,
            path: path.into(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attribute the error to the request path that surfaced it.
    pub fn at_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    /// Server-provided minimum wait before retrying, when one was given.
    pub fn retry_after(&self) -> Option<Duration> {
        self.details
            .as_ref()
            .and_then(|details| details.get("retryAfterMs"))
            .and_then(|value| value.as_u64())
            .map(Duration::from_millis)
    }

    /// True when the request was refused locally because the network is offline.
    pub fn is_offline(&self) -> bool {
        self.code == ErrorCode::NetworkError
            && self
                .details
                .as_ref()
                .and_then(|details| details.get("offline"))
                .and_then(|value| value.as_bool())
                .unwrap_or(false)
    }
}

/// Raw failure produced while talking to the backend, before classification.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The connection could not be established or broke mid-flight
    #[error("network failure: {0}")]
    Network(String),
    /// The call exceeded its timeout and was aborted
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The client knows it is offline and did not attempt the call
    #[error("network is offline")]
    Offline,
    /// The backend answered with a non-success status
    #[error("unexpected response from server: {status}")]
    Status {
        status: StatusCode,
        headers: HeaderMap,
        body: String,
    },
    /// The response body could not be read or decoded
    #[error("failed to decode response: {0}")]
    Decode(String),
    /// The request could not be built (bad URL, unserializable body)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The client was shut down while the call was waiting
    #[error("client shut down")]
    Cancelled,
}

impl From<reqwest::Error> for TransportFailure {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportFailure::Timeout(Duration::ZERO)
        } else if error.is_decode() || error.is_body() {
            TransportFailure::Decode(error.to_string())
        } else if error.is_builder() {
            TransportFailure::InvalidRequest(error.to_string())
        } else {
            TransportFailure::Network(error.to_string())
        }
    }
}

/// Error types that can occur during CLI command execution
#[derive(Debug, Error)]
pub enum CliError {
    /// Error when an unsupported or undefined subcommand is encountered
    #[error("Undefined or unsupported subcommand: {0}")]
    UnsupportedSubcommand(String),
    /// Error related to configuration loading or management
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] crate::configuration::ConfigurationError),
    /// Error related to data formatting
    #[error("Formatting error: {0}")]
    FormattingError(#[from] crate::format::FormattingError),
    /// Error when the local state directory or keyring is unusable
    #[error("Storage error: {0}")]
    StorageError(#[from] crate::storage::StorageError),
    /// Error when a command-line argument has an unusable value
    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },
    /// Error related to JSON serialization/deserialization
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// Error returned by the API client
    #[error("{0}")]
    ApiError(#[from] NormalizedError),
}

impl CliError {
    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> CampusExitCode {
        match self {
            CliError::UnsupportedSubcommand(_) => CampusExitCode::UsageError,
            CliError::ConfigurationError(_) => CampusExitCode::ConfigError,
            CliError::FormattingError(_) => CampusExitCode::DataError,
            CliError::StorageError(_) => CampusExitCode::ConfigError,
            CliError::InvalidArgument { .. } => CampusExitCode::UsageError,
            CliError::JsonError(_) => CampusExitCode::DataError,
            CliError::ApiError(e) => e.code.exit_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(ErrorCode::NetworkError.to_string(), "NETWORK_ERROR");
        assert_eq!(ErrorCode::RateLimitError.to_string(), "RATE_LIMIT_ERROR");
        assert_eq!(
            ErrorCode::from_str("PROGRAM_CONTEXT_ERROR").unwrap(),
            ErrorCode::ProgramContextError
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::NotFoundError).unwrap(),
            "\"NOT_FOUND_ERROR\""
        );
    }

    #[test]
    fn test_taxonomy_is_closed() {
        assert_eq!(ErrorCode::iter().count(), 11);
    }

    #[test]
    fn test_retry_after_from_details() {
        let error = NormalizedError::new(ErrorCode::RateLimitError, "slow down", 429, "/x", Utc::now())
            .with_details(serde_json::json!({ "retryAfterMs": 1500 }));
        assert_eq!(error.retry_after(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_cli_error_exit_code_follows_api_code() {
        let error = CliError::ApiError(NormalizedError::new(
            ErrorCode::AuthenticationError,
            "session expired",
            401,
            "/students",
            Utc::now(),
        ));
        assert_eq!(error.exit_code(), CampusExitCode::AuthError);
    }
}
