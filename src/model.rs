//! Data shapes exchanged between callers and the client.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Description of one logical request.
///
/// A body is only sent for non-GET methods and query parameters only for GET;
/// the pipeline drops whichever does not apply.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    /// Per-request headers, highest precedence
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Overrides the client's default timeout
    pub timeout: Option<Duration>,
    pub skip_auth: bool,
    pub skip_program_context: bool,
    pub use_cache: bool,
    /// Overrides the client's default cache TTL
    pub cache_ttl: Option<Duration>,
    pub retry_on_failure: bool,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
            timeout: None,
            skip_auth: false,
            skip_program_context: false,
            use_cache: true,
            cache_ttl: None,
            retry_on_failure: true,
        }
    }
}

impl RequestSpec {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn skip_program_context(mut self) -> Self {
        self.skip_program_context = true;
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.retry_on_failure = false;
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    /// Whether the method changes server state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

/// Pagination block returned with list endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default, alias = "per_page", alias = "pageSize")]
    pub per_page: Option<u64>,
    #[serde(default, alias = "totalCount")]
    pub total: Option<u64>,
    #[serde(default, alias = "page_count", alias = "totalPages")]
    pub page_count: Option<u64>,
}

/// Uniform success shape handed back to callers.
///
/// When `success` is true, `data` is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResponse<T> {
    pub data: Option<T>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageData>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    /// HTTP status of the response, 0 when served from cache or queued
    pub status: u16,
    #[serde(default)]
    pub from_cache: bool,
    /// Offline queue id when the request was deferred instead of sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued: Option<Uuid>,
}

impl NormalizedResponse<serde_json::Value> {
    /// Deserialize the payload into the caller's type.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<NormalizedResponse<T>, serde_json::Error> {
        let data = match self.data {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };
        Ok(NormalizedResponse {
            data,
            success: self.success,
            message: self.message,
            meta: self.meta,
            timestamp: self.timestamp,
            request_id: self.request_id,
            status: self.status,
            from_cache: self.from_cache,
            queued: self.queued,
        })
    }
}

/// The authentication token pair and its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthState {
    pub fn empty() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            expires_at: None,
        }
    }

    /// True when the access token is missing or expires within `skew` of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        if self.access_token.is_none() {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => {
                let skew = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::zero());
                match now.checked_add_signed(skew) {
                    Some(threshold) => threshold >= expires_at,
                    None => true,
                }
            }
            None => false,
        }
    }

    pub fn is_authenticated(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now, Duration::ZERO)
    }

    pub fn has_tokens(&self) -> bool {
        self.access_token.is_some() || self.refresh_token.is_some()
    }
}

/// The active tenant ("program") selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramContext {
    pub program_id: String,
    pub program_name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl ProgramContext {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// A mutating request deferred while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueEntry {
    pub id: Uuid,
    pub url: String,
    pub path: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Headers captured at enqueue time, including the program context; never
    /// the bearer token
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub skip_auth: bool,
}

impl OfflineQueueEntry {
    /// Resources are identified by URL path, ignoring any query string.
    pub fn resource_key(&self) -> &str {
        let without_query = self.url.split('?').next().unwrap_or(&self.url);
        without_query.trim_end_matches('/')
    }

    pub fn method(&self) -> Method {
        Method::from_bytes(self.method.as_bytes()).unwrap_or(Method::POST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutating_methods() {
        assert!(!RequestSpec::get().is_mutating());
        assert!(RequestSpec::new(Method::POST).is_mutating());
        assert!(RequestSpec::new(Method::DELETE).is_mutating());
        assert!(!RequestSpec::new(Method::HEAD).is_mutating());
    }

    #[test]
    fn test_auth_state_expiry_with_skew() {
        let now = Utc::now();
        let state = AuthState {
            access_token: Some("a".to_string()),
            refresh_token: Some("r".to_string()),
            expires_at: Some(now + chrono::Duration::seconds(20)),
        };
        assert!(state.is_authenticated(now));
        assert!(state.is_expired(now, Duration::from_secs(30)));
        assert!(!state.is_expired(now, Duration::from_secs(10)));
    }

    #[test]
    fn test_auth_state_unknown_expiry_is_valid() {
        let state = AuthState {
            access_token: Some("opaque".to_string()),
            refresh_token: None,
            expires_at: None,
        };
        assert!(state.is_authenticated(Utc::now()));
        assert!(!AuthState::empty().is_authenticated(Utc::now()));
    }

    #[test]
    fn test_auth_state_skew_near_calendar_end() {
        let state = AuthState {
            access_token: Some("a".to_string()),
            refresh_token: None,
            expires_at: Some(DateTime::<Utc>::MAX_UTC),
        };
        let now = DateTime::<Utc>::MAX_UTC - chrono::Duration::seconds(1);
        assert!(state.is_expired(now, Duration::from_secs(30)));
    }

    #[test]
    fn test_resource_key_ignores_query() {
        let entry = OfflineQueueEntry {
            id: Uuid::new_v4(),
            url: "http://h/api/v1/students/4/?notify=true".to_string(),
            path: "/students/4".to_string(),
            method: "PUT".to_string(),
            body: None,
            headers: BTreeMap::new(),
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries: 3,
            skip_auth: false,
        };
        assert_eq!(entry.resource_key(), "http://h/api/v1/students/4");
        assert_eq!(entry.method(), Method::PUT);
    }

    #[test]
    fn test_page_data_accepts_snake_case() {
        let page: PageData =
            serde_json::from_str(r#"{"page":2,"per_page":25,"total":80,"page_count":4}"#).unwrap();
        assert_eq!(page.per_page, Some(25));
        assert_eq!(page.page_count, Some(4));
    }

    #[test]
    fn test_into_typed() {
        let response = NormalizedResponse {
            data: Some(serde_json::json!({"id": 7})),
            success: true,
            message: None,
            meta: None,
            timestamp: Utc::now(),
            request_id: "r".to_string(),
            status: 200,
            from_cache: false,
            queued: None,
        };
        #[derive(Deserialize)]
        struct Student {
            id: u32,
        }
        let typed: NormalizedResponse<Student> = response.into_typed().unwrap();
        assert_eq!(typed.data.unwrap().id, 7);
    }
}
