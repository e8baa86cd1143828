//! The request pipeline.
//!
//! [`ApiClient`] is the only type callers talk to. A request flows through:
//! URL construction, request interceptors, cache lookup, offline check,
//! auth and program context headers, the network call, and then either
//! normalization plus response interceptors or classification plus recovery
//! (one refresh-and-replay on 401, backoff retry for transient failures,
//! enqueue when the network dropped).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::cache::{CacheConfig, CacheManager};
use crate::clock::{Clock, SystemClock};
use crate::configuration::{ClientConfig, ConfigurationError};
use crate::error::{ErrorCode, NormalizedError, TransportFailure};
use crate::error_handler::{ErrorHandler, RetryPolicy};
use crate::interceptor::{ErrorInterceptor, Interceptors, RequestInterceptor, ResponseInterceptor};
use crate::model::{
    AuthState, NormalizedResponse, OfflineQueueEntry, PageData, ProgramContext, RequestSpec,
};
use crate::network::{ManualNetworkStatus, NetworkStatusProvider};
use crate::offline_queue::{OfflineQueueManager, QueueEvent, ReplayExecutor, ReplayReport};
use crate::program_context::{ProgramContextManager, PROGRAM_CONTEXT_HEADER};
use crate::storage::{MemoryStore, StateStore};
use crate::token_manager::{HttpTokenRefresher, TokenGrant, TokenManager, TokenRefresher, TokenSettings};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Who issued a dispatch. Only caller requests may be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Replay,
    Login,
}

/// A 2xx answer before normalization.
struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

/// What the cache keeps for a GET.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPayload {
    data: Value,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    meta: Option<PageData>,
}

/// Assembles an [`ApiClient`] from its collaborators.
pub struct ClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn StateStore>>,
    network: Option<Arc<dyn NetworkStatusProvider>>,
    clock: Option<Arc<dyn Clock>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            store: None,
            network: None,
            clock: None,
            refresher: None,
            http: None,
        }
    }

    /// Where tokens, program context and the offline queue persist.
    /// Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to a provider that always reports online.
    pub fn network(mut self, network: Arc<dyn NetworkStatusProvider>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to [`HttpTokenRefresher`] against the configured refresh path.
    pub fn token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<ApiClient, ConfigurationError> {
        self.config.validate()?;
        let config = self.config;

        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .build()
                .map_err(|cause| ConfigurationError::FailedToBuildHttpClient { cause })?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let network = self
            .network
            .unwrap_or_else(|| Arc::new(ManualNetworkStatus::online()));
        let refresher = self.refresher.unwrap_or_else(|| {
            Arc::new(HttpTokenRefresher::new(http.clone(), &config, clock.clone()))
        });

        let tokens = TokenManager::new(
            refresher,
            store.clone(),
            clock.clone(),
            TokenSettings::from_config(&config),
        );
        let inner = ClientInner {
            tokens,
            context: ProgramContextManager::new(store.clone()),
            cache: CacheManager::new(CacheConfig::from_config(&config), clock.clone()),
            errors: ErrorHandler::new(RetryPolicy::from_config(&config), clock.clone()),
            queue: OfflineQueueManager::new(store),
            interceptors: Interceptors::default(),
            shutdown: CancellationToken::new(),
            sync_task: Mutex::new(None),
            http,
            network,
            clock,
            config,
        };
        debug!("Built API client for {}", inner.config.base_url);
        Ok(ApiClient {
            inner: Arc::new(inner),
        })
    }
}

struct ClientInner {
    config: ClientConfig,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    network: Arc<dyn NetworkStatusProvider>,
    tokens: TokenManager,
    context: ProgramContextManager,
    cache: CacheManager,
    errors: ErrorHandler,
    queue: OfflineQueueManager,
    interceptors: Interceptors,
    shutdown: CancellationToken,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

/// Resilient client for the campus backend. Clones share all state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Client with in-memory state, always online.
    pub fn new(config: ClientConfig) -> Result<ApiClient, ConfigurationError> {
        ClientBuilder::new(config).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub async fn get(&self, path: &str) -> Result<NormalizedResponse<Value>, NormalizedError> {
        self.request(path, RequestSpec::get()).await
    }

    /// GET, decoding the payload into `T`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<NormalizedResponse<T>, NormalizedError> {
        let response = self.get(path).await?;
        response.into_typed().map_err(|e| {
            self.inner
                .errors
                .classify(&TransportFailure::Decode(e.to_string()), path)
        })
    }

    pub async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<NormalizedResponse<Value>, NormalizedError> {
        self.send_with_body(Method::POST, path, body).await
    }

    pub async fn put<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<NormalizedResponse<Value>, NormalizedError> {
        self.send_with_body(Method::PUT, path, body).await
    }

    pub async fn patch<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<NormalizedResponse<Value>, NormalizedError> {
        self.send_with_body(Method::PATCH, path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<NormalizedResponse<Value>, NormalizedError> {
        self.request(path, RequestSpec::new(Method::DELETE)).await
    }

    async fn send_with_body<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<NormalizedResponse<Value>, NormalizedError> {
        let body = serde_json::to_value(body).map_err(|e| {
            self.inner
                .errors
                .classify(&TransportFailure::InvalidRequest(e.to_string()), path)
        })?;
        self.request(path, RequestSpec::new(method).body(body)).await
    }

    /// Run one logical request through the pipeline.
    pub async fn request(
        &self,
        path: &str,
        spec: RequestSpec,
    ) -> Result<NormalizedResponse<Value>, NormalizedError> {
        self.run(path, spec, Origin::Caller).await.map_err(|error| {
            debug!("Request to {} failed: {}", path, error);
            self.inner.interceptors.error.apply(error)
        })
    }

    async fn run(
        &self,
        path: &str,
        spec: RequestSpec,
        origin: Origin,
    ) -> Result<NormalizedResponse<Value>, NormalizedError> {
        let inner = &self.inner;
        let url = inner.config.build_url(path);
        let spec = inner.interceptors.request.apply(path, spec);

        // read fresh for every request; later switches do not affect this one
        let context = if spec.skip_program_context {
            None
        } else {
            inner.context.get_context()
        };

        let cache_key = (spec.is_get() && spec.use_cache && inner.cache.is_enabled())
            .then(|| cache_key_for(&url, &spec.query, context.as_ref()));
        if let Some(key) = &cache_key {
            if let Some(cached) = inner.cache.get::<CachedPayload>(key) {
                trace!("Serving {} from cache", url);
                return Ok(NormalizedResponse {
                    data: Some(cached.data),
                    success: true,
                    message: cached.message,
                    meta: cached.meta,
                    timestamp: inner.clock.now(),
                    request_id: Uuid::new_v4().to_string(),
                    status: 0,
                    from_cache: true,
                    queued: None,
                });
            }
        }

        self.dispatch(path, &url, spec, context, cache_key, origin)
            .await
    }

    async fn dispatch(
        &self,
        path: &str,
        url: &str,
        spec: RequestSpec,
        context: Option<ProgramContext>,
        cache_key: Option<String>,
        origin: Origin,
    ) -> Result<NormalizedResponse<Value>, NormalizedError> {
        let inner = &self.inner;

        if !inner.network.is_connected() {
            if self.may_enqueue(&spec, origin) {
                return Ok(self.enqueue(path, url, &spec, context.as_ref()));
            }
            return Err(inner.errors.classify(&TransportFailure::Offline, path));
        }

        let mut token = if spec.skip_auth {
            None
        } else {
            let had_session = inner.tokens.auth_state().has_tokens();
            Some(
                inner
                    .tokens
                    .valid_token()
                    .await
                    .map_err(|e| self.auth_failed(e, had_session, path))?,
            )
        };
        let version = inner.cache.begin_write();
        let timeout = spec.timeout.unwrap_or_else(|| inner.config.timeout());

        let mut attempt: u32 = 0;
        let mut replayed_after_refresh = false;
        loop {
            let started = Instant::now();
            self.log_request(&spec.method, url);
            let outcome = match tokio::time::timeout(
                timeout,
                self.send_once(url, &spec, token.as_deref(), context.as_ref()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportFailure::Timeout(timeout)),
            };

            let failure = match outcome {
                Ok(raw) => {
                    self.log_response(&spec.method, url, raw.status.as_u16(), started);
                    return Ok(self.complete(url, &spec, raw, cache_key, version));
                }
                Err(failure) => failure,
            };
            let error = inner.errors.classify(&failure, path);
            self.log_failure(&spec.method, url, &error, started);

            if error.code == ErrorCode::AuthenticationError
                && !spec.skip_auth
                && !replayed_after_refresh
            {
                replayed_after_refresh = true;
                debug!("Access token rejected on {}, refreshing once", path);
                let fresh = inner
                    .tokens
                    .recover_from_rejection(token.as_deref())
                    .await
                    .map_err(|e| self.auth_failed(e, true, path))?;
                token = Some(fresh);
                continue;
            }

            if spec.retry_on_failure && inner.errors.should_retry(&error, attempt) {
                let delay = inner.errors.backoff(&error, attempt);
                attempt += 1;
                debug!(
                    "Retrying {} {} in {:?} (attempt {} of {})",
                    spec.method,
                    url,
                    delay,
                    attempt,
                    inner.errors.policy().max_retries
                );
                tokio::select! {
                    _ = inner.shutdown.cancelled() => {
                        return Err(inner.errors.classify(&TransportFailure::Cancelled, path));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            if error.code == ErrorCode::NetworkError
                && !inner.network.is_connected()
                && self.may_enqueue(&spec, origin)
            {
                return Ok(self.enqueue(path, url, &spec, context.as_ref()));
            }

            return Err(error);
        }
    }

    async fn send_once(
        &self,
        url: &str,
        spec: &RequestSpec,
        token: Option<&str>,
        context: Option<&ProgramContext>,
    ) -> Result<RawResponse, TransportFailure> {
        let headers = self.build_headers(spec, token, context)?;
        let mut request = self
            .inner
            .http
            .request(spec.method.clone(), url)
            .headers(headers);
        if spec.is_get() {
            if !spec.query.is_empty() {
                request = request.query(&spec.query);
            }
        } else if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if status.is_success() {
            Ok(RawResponse {
                status,
                headers,
                body,
            })
        } else {
            Err(TransportFailure::Status {
                status,
                headers,
                body,
            })
        }
    }

    /// Content type, then configured defaults, then per-request headers, then
    /// bearer and program context.
    fn build_headers(
        &self,
        spec: &RequestSpec,
        token: Option<&str>,
        context: Option<&ProgramContext>,
    ) -> Result<HeaderMap, TransportFailure> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, header_value(mime::APPLICATION_JSON.as_ref())?);
        for (name, value) in self.inner.config.headers.iter().chain(spec.headers.iter()) {
            headers.insert(header_name(name)?, header_value(value)?);
        }
        if let Some(token) = token {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        }
        if let Some(context) = context {
            headers.insert(
                header_name(PROGRAM_CONTEXT_HEADER)?,
                header_value(&context.program_id)?,
            );
        }
        Ok(headers)
    }

    fn complete(
        &self,
        url: &str,
        spec: &RequestSpec,
        raw: RawResponse,
        cache_key: Option<String>,
        version: u64,
    ) -> NormalizedResponse<Value> {
        let inner = &self.inner;
        let request_id = raw
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let payload = if raw.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw.body).unwrap_or(Value::String(raw.body))
        };
        let (success, data, message, meta) = unwrap_envelope(payload);

        let response = inner.interceptors.response.apply(NormalizedResponse {
            data,
            success,
            message,
            meta,
            timestamp: inner.clock.now(),
            request_id,
            status: raw.status.as_u16(),
            from_cache: false,
            queued: None,
        });

        if let (Some(key), true) = (cache_key, response.success) {
            let cached = CachedPayload {
                data: response.data.clone().unwrap_or(Value::Null),
                message: response.message.clone(),
                meta: response.meta.clone(),
            };
            match serde_json::to_value(&cached) {
                Ok(value) => {
                    inner.cache.set_versioned(&key, value, spec.cache_ttl, version);
                }
                Err(e) => warn!("Failed to cache response for {}: {}", url, e),
            }
        }

        if spec.is_mutating() {
            let prefix = self.collection_prefix(url);
            let removed = inner.cache.invalidate_prefix(&prefix);
            if removed > 0 {
                trace!("Invalidated {} cache entries under {}", removed, prefix);
            }
        }

        response
    }

    /// A rejected refresh ends the session; cached reads go with it.
    fn auth_failed(&self, error: NormalizedError, had_session: bool, path: &str) -> NormalizedError {
        if had_session
            && error.code == ErrorCode::AuthenticationError
            && !self.inner.tokens.auth_state().has_tokens()
        {
            debug!("Session ended by a rejected refresh, clearing the response cache");
            self.inner.cache.clear();
        }
        error.at_path(path)
    }

    /// `<base>/<version>/<first segment>` for a request URL.
    fn collection_prefix(&self, url: &str) -> String {
        let url = url.split('?').next().unwrap_or(url);
        let root = self.inner.config.build_url("");
        match url.strip_prefix(&root) {
            Some(rest) => {
                let first = rest.split('/').find(|s| !s.is_empty()).unwrap_or("");
                format!("{}{}", root, first)
            }
            None => url.trim_end_matches('/').to_string(),
        }
    }

    fn may_enqueue(&self, spec: &RequestSpec, origin: Origin) -> bool {
        origin == Origin::Caller && spec.is_mutating() && self.inner.config.enable_offline_queue
    }

    fn enqueue(
        &self,
        path: &str,
        url: &str,
        spec: &RequestSpec,
        context: Option<&ProgramContext>,
    ) -> NormalizedResponse<Value> {
        let mut headers = spec.headers.clone();
        headers.retain(|name, _| !name.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
        if let Some(context) = context {
            headers.insert(PROGRAM_CONTEXT_HEADER.to_string(), context.program_id.clone());
        }
        let now = self.inner.clock.now();
        let id = self.inner.queue.enqueue(OfflineQueueEntry {
            id: Uuid::new_v4(),
            url: url.to_string(),
            path: path.to_string(),
            method: spec.method.to_string(),
            body: spec.body.clone(),
            headers,
            enqueued_at: now,
            retry_count: 0,
            max_retries: self.inner.config.queue_max_retries,
            skip_auth: spec.skip_auth,
        });
        NormalizedResponse {
            data: None,
            success: false,
            message: Some("Offline: request queued for replay".to_string()),
            meta: None,
            timestamp: now,
            request_id: id.to_string(),
            status: 0,
            from_cache: false,
            queued: Some(id),
        }
    }

    fn log_request(&self, method: &Method, url: &str) {
        if self.inner.config.enable_logging {
            info!("--> {} {}", method, url);
        } else {
            trace!("--> {} {}", method, url);
        }
    }

    fn log_response(&self, method: &Method, url: &str, status: u16, started: Instant) {
        if self.inner.config.enable_logging {
            info!("<-- {} {} {} ({:?})", status, method, url, started.elapsed());
        } else {
            trace!("<-- {} {} {} ({:?})", status, method, url, started.elapsed());
        }
    }

    fn log_failure(&self, method: &Method, url: &str, error: &NormalizedError, started: Instant) {
        if self.inner.config.enable_logging {
            info!("<-- {} {} {} failed: {} ({:?})", error.status, method, url, error.code, started.elapsed());
        } else {
            debug!("<-- {} {} {} failed: {} ({:?})", error.status, method, url, error.code, started.elapsed());
        }
    }

    /// Exchange credentials for tokens at the configured login path.
    pub async fn login<C: Serialize>(&self, credentials: &C) -> Result<AuthState, NormalizedError> {
        let path = self.inner.config.auth.login_path.clone();
        let body = serde_json::to_value(credentials).map_err(|e| {
            self.inner
                .errors
                .classify(&TransportFailure::InvalidRequest(e.to_string()), &path)
        })?;
        let spec = RequestSpec::new(Method::POST)
            .body(body)
            .skip_auth()
            .skip_program_context()
            .no_retry();
        let response = self
            .run(&path, spec, Origin::Login)
            .await
            .map_err(|error| self.inner.interceptors.error.apply(error))?;

        let grant = TokenGrant::from_json(response.data.unwrap_or(Value::Null)).map_err(|e| {
            self.inner
                .errors
                .classify(&TransportFailure::Decode(e.to_string()), &path)
        })?;
        self.inner.tokens.apply_grant(grant);
        info!("Signed in");
        Ok(self.inner.tokens.auth_state())
    }

    pub fn set_auth_token(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<Duration>,
    ) {
        self.inner
            .tokens
            .set_tokens(access_token, refresh_token, expires_in);
    }

    /// Forget tokens and every cached response.
    pub fn clear_auth(&self) {
        self.inner.tokens.clear_tokens();
        self.inner.cache.clear();
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.tokens.auth_state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.tokens.is_authenticated()
    }

    pub fn set_program_context(&self, program_id: impl Into<String>, program_name: impl Into<String>) {
        self.inner.context.set_context(program_id, program_name);
    }

    pub fn set_full_program_context(&self, context: ProgramContext) {
        self.inner.context.set_full_context(context);
    }

    pub fn program_context(&self) -> Option<ProgramContext> {
        self.inner.context.get_context()
    }

    pub fn clear_program_context(&self) {
        self.inner.context.clear_context();
    }

    pub fn add_request_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) {
        self.inner.interceptors.request.push(interceptor);
    }

    pub fn add_response_interceptor(&self, interceptor: Arc<dyn ResponseInterceptor>) {
        self.inner.interceptors.response.push(interceptor);
    }

    pub fn add_error_interceptor(&self, interceptor: Arc<dyn ErrorInterceptor>) {
        self.inner.interceptors.error.push(interceptor);
    }

    pub fn invalidate_cache(&self, path: &str) -> usize {
        self.inner
            .cache
            .invalidate_prefix(&self.inner.config.build_url(path))
    }

    pub fn pending_requests(&self) -> Vec<OfflineQueueEntry> {
        self.inner.queue.pending()
    }

    pub fn subscribe_queue_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.queue.subscribe()
    }

    /// Replay queued requests now. Does nothing while offline.
    pub async fn flush_offline_queue(&self) -> Vec<ReplayReport> {
        if !self.inner.network.is_connected() {
            debug!("Still offline, not flushing the queue");
            return Vec::new();
        }
        self.inner.queue.flush(self).await
    }

    /// Watch connectivity and flush the queue on every offline to online
    /// transition. Also flushes once at start when online with queued work.
    pub fn start_offline_sync(&self) {
        let mut slot = self
            .inner
            .sync_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let cancel = self.inner.shutdown.clone();
        let mut status = self.inner.network.subscribe();

        *slot = Some(tokio::spawn(async move {
            let mut was_connected = status.borrow_and_update().is_connected();
            if was_connected {
                if let Some(inner) = weak.upgrade() {
                    let client = ApiClient { inner };
                    if !client.inner.queue.is_empty() {
                        client.flush_offline_queue().await;
                    }
                }
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let connected = status.borrow_and_update().is_connected();
                        if connected && !was_connected {
                            info!("Connectivity restored, replaying queued requests");
                            match weak.upgrade() {
                                Some(inner) => {
                                    ApiClient { inner }.flush_offline_queue().await;
                                }
                                None => break,
                            }
                        }
                        was_connected = connected;
                    }
                }
            }
            debug!("Offline sync stopped");
        }));
    }

    /// Cancel pending retry waits and stop the offline sync task.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self
            .inner
            .sync_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Offline sync task ended abnormally: {}", e);
            }
        }
    }
}

#[async_trait]
impl ReplayExecutor for ApiClient {
    async fn replay(&self, entry: &OfflineQueueEntry) -> Result<(), NormalizedError> {
        let mut spec = RequestSpec::new(entry.method()).no_cache().no_retry();
        spec.headers = entry.headers.clone();
        spec.body = entry.body.clone();
        spec.skip_auth = entry.skip_auth;
        // the context header captured at enqueue time is already in `headers`
        spec.skip_program_context = true;

        self.dispatch(&entry.path, &entry.url, spec, None, None, Origin::Replay)
            .await
            .map(|_| ())
            .map_err(|error| {
                // a transport failure after the link dropped is reported as offline
                if error.code == ErrorCode::NetworkError && !self.inner.network.is_connected() {
                    self.inner
                        .errors
                        .classify(&TransportFailure::Offline, &entry.path)
                } else {
                    error
                }
            })
    }
}

fn header_name(name: &str) -> Result<HeaderName, TransportFailure> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TransportFailure::InvalidRequest(format!("header {}: {}", name, e)))
}

fn header_value(value: &str) -> Result<HeaderValue, TransportFailure> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportFailure::InvalidRequest(format!("header value: {}", e)))
}

/// Cache key: URL, encoded query, and the program the response was fetched for.
fn cache_key_for(url: &str, query: &BTreeMap<String, String>, context: Option<&ProgramContext>) -> String {
    let mut key = url.to_string();
    if !query.is_empty() {
        if let Ok(encoded) = serde_urlencoded::to_string(query) {
            key.push('?');
            key.push_str(&encoded);
        }
    }
    if let Some(context) = context {
        key.push('#');
        key.push_str(&context.program_id);
    }
    key
}

/// Split a response body into (success, data, message, meta).
fn unwrap_envelope(payload: Value) -> (bool, Option<Value>, Option<String>, Option<PageData>) {
    let mut map = match payload {
        Value::Object(map) => map,
        other => return (true, Some(other), None, None),
    };

    let success = map.get("success").and_then(Value::as_bool);
    let has_meta = map.contains_key("meta") || map.contains_key("pagination");
    let is_envelope = success.is_some()
        || (map.contains_key("data") && (has_meta || map.contains_key("message")));
    if !is_envelope {
        return (true, Some(Value::Object(map)), None, None);
    }

    let success = success.unwrap_or(true);
    let message = map
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);
    let meta = map
        .remove("meta")
        .or_else(|| map.remove("pagination"))
        .and_then(|value| serde_json::from_value::<PageData>(value).ok());
    let data = match map.remove("data") {
        Some(data) => Some(data),
        None if success => Some(Value::Null),
        None => None,
    };
    (success, data, message, meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_envelope_with_pagination() {
        let (success, data, message, meta) = unwrap_envelope(json!({
            "success": true,
            "data": [{"id": 1}],
            "message": "ok",
            "pagination": {"page": 1, "pageSize": 20, "total": 41, "totalPages": 3}
        }));
        assert!(success);
        assert_eq!(data, Some(json!([{"id": 1}])));
        assert_eq!(message.as_deref(), Some("ok"));
        let meta = meta.unwrap();
        assert_eq!(meta.per_page, Some(20));
        assert_eq!(meta.page_count, Some(3));
    }

    #[test]
    fn test_plain_bodies_are_data() {
        let (success, data, _, meta) = unwrap_envelope(json!({"id": 3, "name": "Ada"}));
        assert!(success);
        assert_eq!(data, Some(json!({"id": 3, "name": "Ada"})));
        assert!(meta.is_none());

        let (_, data, _, _) = unwrap_envelope(Value::Null);
        assert_eq!(data, Some(Value::Null));
    }

    #[test]
    fn test_unsuccessful_envelope() {
        let (success, data, message, _) =
            unwrap_envelope(json!({"success": false, "message": "nothing to do"}));
        assert!(!success);
        assert_eq!(data, None);
        assert_eq!(message.as_deref(), Some("nothing to do"));
    }

    #[test]
    fn test_cache_key_includes_query_and_program() {
        let mut query = BTreeMap::new();
        query.insert("page".to_string(), "2".to_string());
        query.insert("q".to_string(), "a b".to_string());
        let context = ProgramContext {
            program_id: "P1".to_string(),
            program_name: "Nursing".to_string(),
            permissions: vec![],
        };
        assert_eq!(
            cache_key_for("http://h/v1/students", &query, Some(&context)),
            "http://h/v1/students?page=2&q=a+b#P1"
        );
        assert_eq!(cache_key_for("http://h/v1/x", &BTreeMap::new(), None), "http://h/v1/x");
    }

    #[test]
    fn test_collection_prefix() {
        let client = ApiClient::new(ClientConfig::default().with_base_url("http://h/api")).unwrap();
        assert_eq!(
            client.collection_prefix("http://h/api/v1/students/4?notify=1"),
            "http://h/api/v1/students"
        );
        assert_eq!(client.collection_prefix("http://other/x/"), "http://other/x");
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = ClientConfig {
            timeout_ms: 0,
            ..ClientConfig::default()
        };
        assert!(ApiClient::new(config).is_err());
    }
}
