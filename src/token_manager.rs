//! Authentication token lifecycle.
//!
//! The [`TokenManager`] owns the access/refresh token pair and hands out a
//! currently valid access token, refreshing it when needed. Refreshes are
//! deduplicated: while one is in flight every caller attaches to the same
//! shared future and observes the same outcome. The in-flight handle is
//! cleared when the refresh completes, fails or times out.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::configuration::ClientConfig;
use crate::error::{ErrorCode, NormalizedError, TransportFailure};
use crate::error_handler::{ErrorHandler, RetryPolicy};
use crate::model::AuthState;
use crate::storage::{StateStore, KEY_ACCESS_TOKEN, KEY_EXPIRES_AT, KEY_REFRESH_TOKEN};

/// Tokens issued by the login or refresh endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    #[serde(rename = "accessToken", alias = "access_token")]
    pub access_token: String,
    #[serde(default, rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default, rename = "expiresIn", alias = "expires_in")]
    pub expires_in: Option<u64>,
}

impl TokenGrant {
    /// Parse a grant, accepting both a bare object and a `data` envelope.
    pub fn from_json(value: Value) -> Result<TokenGrant, serde_json::Error> {
        match value {
            Value::Object(ref map) if map.get("data").is_some_and(Value::is_object) => {
                serde_json::from_value(map["data"].clone())
            }
            other => serde_json::from_value(other),
        }
    }
}

/// Performs the refresh network call.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, NormalizedError>;
}

/// Refreshes tokens by POSTing `{"refreshToken": ...}` to the refresh endpoint.
pub struct HttpTokenRefresher {
    http: reqwest::Client,
    url: String,
    path: String,
    headers: BTreeMap<String, String>,
    error_handler: ErrorHandler,
}

impl HttpTokenRefresher {
    pub fn new(http: reqwest::Client, config: &ClientConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            url: config.build_url(&config.auth.refresh_path),
            path: config.auth.refresh_path.clone(),
            headers: config.headers.clone(),
            error_handler: ErrorHandler::new(RetryPolicy::from_config(config), clock),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, NormalizedError> {
        trace!("Requesting token refresh from {}", self.url);
        let mut request = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
            .json(&serde_json::json!({ "refreshToken": refresh_token }));
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let classify = |failure: TransportFailure| self.error_handler.classify(&failure, &self.path);

        let response = request
            .send()
            .await
            .map_err(|e| classify(TransportFailure::from(e)))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| classify(TransportFailure::from(e)))?;

        if !status.is_success() {
            return Err(classify(TransportFailure::Status {
                status,
                headers,
                body,
            }));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| classify(TransportFailure::Decode(e.to_string())))?;
        TokenGrant::from_json(value).map_err(|e| classify(TransportFailure::Decode(e.to_string())))
    }
}

/// Timing knobs for the token manager.
#[derive(Debug, Clone, Copy)]
pub struct TokenSettings {
    /// Treat tokens as expired this long before their real expiry
    pub expiry_skew: Duration,
    pub refresh_timeout: Duration,
}

impl TokenSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            expiry_skew: Duration::from_secs(config.auth.expiry_skew_secs),
            refresh_timeout: config.refresh_timeout(),
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<String, NormalizedError>>>;

struct InFlightRefresh {
    id: u64,
    future: RefreshFuture,
}

struct TokenState {
    auth: AuthState,
    /// Bumped whenever tokens are replaced or cleared outside a refresh
    generation: u64,
    next_refresh_id: u64,
    in_flight: Option<InFlightRefresh>,
}

struct TokenInner {
    state: Mutex<TokenState>,
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    settings: TokenSettings,
}

/// Owner of the authentication token pair. Clones share state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<TokenInner>,
}

impl TokenManager {
    /// Create a manager, restoring any persisted tokens.
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        settings: TokenSettings,
    ) -> Self {
        let auth = restore_auth_state(store.as_ref());
        if auth.has_tokens() {
            debug!("Restored persisted authentication tokens");
        }
        Self {
            inner: Arc::new(TokenInner {
                state: Mutex::new(TokenState {
                    auth,
                    generation: 0,
                    next_refresh_id: 1,
                    in_flight: None,
                }),
                refresher,
                store,
                clock,
                settings,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TokenState> {
        self.inner.state()
    }

    /// Store a fresh token pair. The expiry comes from `expires_in` or, when
    /// absent, from the access token's JWT `exp` claim.
    pub fn set_tokens(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<Duration>,
    ) {
        let access_token = access_token.into();
        let now = self.inner.clock.now();
        let expires_at = expiry_from(now, expires_in, &access_token);
        let mut state = self.state();
        state.auth = AuthState {
            access_token: Some(access_token),
            refresh_token,
            expires_at,
        };
        state.generation += 1;
        self.inner.persist(&state.auth);
        info!("Stored new authentication tokens");
    }

    pub fn apply_grant(&self, grant: TokenGrant) {
        self.set_tokens(
            grant.access_token,
            grant.refresh_token,
            grant.expires_in.map(Duration::from_secs),
        );
    }

    pub fn clear_tokens(&self) {
        let mut state = self.state();
        self.inner.clear_locked(&mut state);
        info!("Cleared authentication tokens");
    }

    pub fn auth_state(&self) -> AuthState {
        self.state().auth.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        let now = self.inner.clock.now();
        self.state().auth.is_authenticated(now)
    }

    /// A currently valid access token, or `None` when none can be obtained.
    pub async fn get_valid_token(&self) -> Option<String> {
        self.valid_token().await.ok()
    }

    /// A currently valid access token, refreshing first when the stored one
    /// has expired.
    pub async fn valid_token(&self) -> Result<String, NormalizedError> {
        let refresh = {
            let mut state = self.state();
            let now = self.inner.clock.now();
            if !state.auth.is_expired(now, self.inner.settings.expiry_skew) {
                if let Some(token) = state.auth.access_token.clone() {
                    return Ok(token);
                }
            }
            if state.auth.refresh_token.is_none() {
                let message = if state.auth.access_token.is_some() {
                    "Session expired, please sign in again"
                } else {
                    "Not authenticated"
                };
                return Err(self.inner.auth_error(message, 0));
            }
            trace!("Access token expired, refresh required");
            self.join_or_start_refresh(&mut state)
        };
        refresh.await
    }

    /// Recover from a 401 that rejected `rejected_token`. If the tokens were
    /// already replaced since that request was sent, the current token is
    /// returned without another refresh.
    pub async fn recover_from_rejection(
        &self,
        rejected_token: Option<&str>,
    ) -> Result<String, NormalizedError> {
        let refresh = {
            let mut state = self.state();
            let now = self.inner.clock.now();
            let current = state.auth.access_token.clone();
            let replaced = match (&current, rejected_token) {
                (Some(current), Some(rejected)) => current != rejected,
                _ => false,
            };
            if replaced && !state.auth.is_expired(now, self.inner.settings.expiry_skew) {
                if let Some(token) = current {
                    debug!("Tokens were refreshed concurrently, reusing the new access token");
                    return Ok(token);
                }
            }
            if state.auth.refresh_token.is_none() {
                self.inner.clear_locked(&mut state);
                return Err(self.inner.auth_error("Session expired, please sign in again", 401));
            }
            self.join_or_start_refresh(&mut state)
        };
        refresh.await
    }

    /// Refresh unconditionally (joining one already in flight).
    pub async fn refresh(&self) -> Result<String, NormalizedError> {
        let refresh = {
            let mut state = self.state();
            if state.auth.refresh_token.is_none() {
                return Err(self.inner.auth_error("No refresh token available", 0));
            }
            self.join_or_start_refresh(&mut state)
        };
        refresh.await
    }

    /// Refresh unconditionally; true on success.
    pub async fn refresh_token(&self) -> bool {
        self.refresh().await.is_ok()
    }

    /// Whether a refresh call is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.state().in_flight.is_some()
    }

    fn join_or_start_refresh(&self, state: &mut TokenState) -> RefreshFuture {
        if let Some(in_flight) = &state.in_flight {
            trace!("Joining in-flight token refresh #{}", in_flight.id);
            return in_flight.future.clone();
        }

        let id = state.next_refresh_id;
        state.next_refresh_id += 1;
        let generation = state.generation;
        let refresh_token = state.auth.refresh_token.clone().unwrap_or_default();
        let inner = Arc::clone(&self.inner);

        debug!("Starting token refresh #{}", id);
        let future = async move {
            let outcome = tokio::time::timeout(
                inner.settings.refresh_timeout,
                inner.refresher.refresh(&refresh_token),
            )
            .await;
            inner.complete_refresh(id, generation, outcome)
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlightRefresh {
            id,
            future: future.clone(),
        });
        // drive the refresh to completion even if every waiter goes away
        tokio::spawn(future.clone());
        future
    }
}

impl TokenInner {
    fn state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn auth_error(&self, message: &str, status: u16) -> NormalizedError {
        NormalizedError::new(
            ErrorCode::AuthenticationError,
            message,
            status,
            "",
            self.clock.now(),
        )
    }

    fn clear_locked(&self, state: &mut TokenState) {
        state.auth = AuthState::empty();
        state.generation += 1;
        for key in [KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_EXPIRES_AT] {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to remove persisted token entry {}: {}", key, e);
            }
        }
    }

    fn persist(&self, auth: &AuthState) {
        let entries = [
            (KEY_ACCESS_TOKEN, auth.access_token.clone()),
            (KEY_REFRESH_TOKEN, auth.refresh_token.clone()),
            (KEY_EXPIRES_AT, auth.expires_at.map(|at| at.to_rfc3339())),
        ];
        for (key, value) in entries {
            let result = match value {
                Some(value) => self.store.save(key, &value),
                None => self.store.remove(key),
            };
            if let Err(e) = result {
                warn!("Failed to persist token entry {}: {}", key, e);
            }
        }
    }

    fn complete_refresh(
        &self,
        id: u64,
        generation: u64,
        outcome: Result<Result<TokenGrant, NormalizedError>, tokio::time::error::Elapsed>,
    ) -> Result<String, NormalizedError> {
        let mut state = self.state();
        if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
            state.in_flight = None;
        }

        match outcome {
            Ok(Ok(grant)) => {
                if state.generation != generation {
                    // tokens were replaced or cleared while refreshing
                    debug!("Discarding refresh #{} result, tokens changed meanwhile", id);
                    return match state.auth.access_token.clone() {
                        Some(token) => Ok(token),
                        None => Err(self.auth_error("Not authenticated", 0)),
                    };
                }
                let now = self.clock.now();
                let expires_in = grant.expires_in.map(Duration::from_secs);
                let refresh_token = grant.refresh_token.or_else(|| state.auth.refresh_token.clone());
                state.auth = AuthState {
                    expires_at: expiry_from(now, expires_in, &grant.access_token),
                    access_token: Some(grant.access_token.clone()),
                    refresh_token,
                };
                self.persist(&state.auth);
                info!("Token refresh #{} succeeded", id);
                Ok(grant.access_token)
            }
            Ok(Err(error)) if is_transient(&error) => {
                warn!("Token refresh #{} failed transiently: {}", id, error);
                Err(error)
            }
            Ok(Err(error)) => {
                warn!("Token refresh #{} rejected, clearing session: {}", id, error);
                if state.generation == generation {
                    self.clear_locked(&mut state);
                }
                let mut surfaced = self.auth_error("Session expired, please sign in again", error.status);
                surfaced.details = error.details;
                Err(surfaced)
            }
            Err(_) => {
                warn!(
                    "Token refresh #{} timed out after {:?}",
                    id, self.settings.refresh_timeout
                );
                Err(NormalizedError::new(
                    ErrorCode::TimeoutError,
                    "Token refresh timed out",
                    0,
                    "",
                    self.clock.now(),
                ))
            }
        }
    }
}

fn is_transient(error: &NormalizedError) -> bool {
    RetryPolicy::is_retryable(error.code) || error.code == ErrorCode::TimeoutError
}

fn expiry_from(
    now: DateTime<Utc>,
    expires_in: Option<Duration>,
    access_token: &str,
) -> Option<DateTime<Utc>> {
    match expires_in {
        // lifetimes past the representable range are treated as no expiry
        Some(lifetime) => chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|d| now.checked_add_signed(d)),
        None => jwt_expiry(access_token),
    }
}

/// Expiry from the `exp` claim of a JWT, if the token is one.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let decoded = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::<Utc>::from_timestamp(exp, 0)
}

fn restore_auth_state(store: &dyn StateStore) -> AuthState {
    let load = |key: &str| match store.load(key) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to load persisted token entry {}: {}", key, e);
            None
        }
    };
    AuthState {
        access_token: load(KEY_ACCESS_TOKEN),
        refresh_token: load(KEY_REFRESH_TOKEN),
        expires_at: load(KEY_EXPIRES_AT)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc)),
    }
}
