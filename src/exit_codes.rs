//! Process exit statuses of the `campus` binary.
//!
//! Local failures reuse the sysexits values from the `exitcode` crate; failures
//! reported by the backend get codes from 100 up so scripts can tell them apart.

use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CampusExitCode {
    #[strum(to_string = "usage error")]
    UsageError,
    #[strum(to_string = "rejected data")]
    DataError,
    #[strum(to_string = "resource not found")]
    NotFound,
    /// Worth retrying later: rate limits and server errors
    #[strum(to_string = "temporary failure")]
    TempFail,
    #[strum(to_string = "internal error")]
    SoftwareError,
    /// Unreadable configuration, or unusable state directory or keyring
    #[strum(to_string = "configuration error")]
    ConfigError,
    #[strum(to_string = "authentication error")]
    AuthError,
    /// Connection failures, timeouts and `--offline` reads
    #[strum(to_string = "network error")]
    NetworkError,
    #[strum(to_string = "API error")]
    ApiError,
}

const API_CODES_START: i32 = 100;

impl CampusExitCode {
    pub fn code(&self) -> i32 {
        match self {
            CampusExitCode::UsageError => exitcode::USAGE,
            CampusExitCode::DataError => exitcode::DATAERR,
            CampusExitCode::NotFound => exitcode::NOUSER,
            CampusExitCode::TempFail => exitcode::UNAVAILABLE,
            CampusExitCode::SoftwareError => exitcode::SOFTWARE,
            CampusExitCode::ConfigError => exitcode::CONFIG,
            CampusExitCode::AuthError => API_CODES_START,
            CampusExitCode::NetworkError => API_CODES_START + 1,
            CampusExitCode::ApiError => API_CODES_START + 2,
        }
    }
}
