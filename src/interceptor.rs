//! Interceptor stages run by the request pipeline.
//!
//! Each stage receives a value and returns a value of the same type; stages
//! run in registration order and cannot short-circuit the call. Closures of
//! the right shape are stages too.

use serde_json::Value;
use std::sync::{Arc, RwLock};

use crate::error::NormalizedError;
use crate::model::{NormalizedResponse, RequestSpec};

/// Transforms an outgoing request before it is dispatched.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, path: &str, request: RequestSpec) -> RequestSpec;
}

/// Transforms a successful response before it is cached and returned.
pub trait ResponseInterceptor: Send + Sync {
    fn intercept(&self, response: NormalizedResponse<Value>) -> NormalizedResponse<Value>;
}

/// Transforms a classified error before it is surfaced.
pub trait ErrorInterceptor: Send + Sync {
    fn intercept(&self, error: NormalizedError) -> NormalizedError;
}

impl<F> RequestInterceptor for F
where
    F: Fn(&str, RequestSpec) -> RequestSpec + Send + Sync,
{
    fn intercept(&self, path: &str, request: RequestSpec) -> RequestSpec {
        self(path, request)
    }
}

impl<F> ResponseInterceptor for F
where
    F: Fn(NormalizedResponse<Value>) -> NormalizedResponse<Value> + Send + Sync,
{
    fn intercept(&self, response: NormalizedResponse<Value>) -> NormalizedResponse<Value> {
        self(response)
    }
}

impl<F> ErrorInterceptor for F
where
    F: Fn(NormalizedError) -> NormalizedError + Send + Sync,
{
    fn intercept(&self, error: NormalizedError) -> NormalizedError {
        self(error)
    }
}

/// Ordered stages of one kind.
pub struct InterceptorChain<I: ?Sized> {
    stages: RwLock<Vec<Arc<I>>>,
}

impl<I: ?Sized> Default for InterceptorChain<I> {
    fn default() -> Self {
        Self {
            stages: RwLock::new(Vec::new()),
        }
    }
}

impl<I: ?Sized> InterceptorChain<I> {
    pub fn push(&self, stage: Arc<I>) {
        self.stages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stages registered so far. Stages added later do not affect a
    /// snapshot already taken.
    fn snapshot(&self) -> Vec<Arc<I>> {
        self.stages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl InterceptorChain<dyn RequestInterceptor> {
    pub fn apply(&self, path: &str, request: RequestSpec) -> RequestSpec {
        self.snapshot()
            .iter()
            .fold(request, |request, stage| stage.intercept(path, request))
    }
}

impl InterceptorChain<dyn ResponseInterceptor> {
    pub fn apply(&self, response: NormalizedResponse<Value>) -> NormalizedResponse<Value> {
        self.snapshot()
            .iter()
            .fold(response, |response, stage| stage.intercept(response))
    }
}

impl InterceptorChain<dyn ErrorInterceptor> {
    pub fn apply(&self, error: NormalizedError) -> NormalizedError {
        self.snapshot()
            .iter()
            .fold(error, |error, stage| stage.intercept(error))
    }
}

/// The three chains a client runs.
#[derive(Default)]
pub struct Interceptors {
    pub request: InterceptorChain<dyn RequestInterceptor>,
    pub response: InterceptorChain<dyn ResponseInterceptor>,
    pub error: InterceptorChain<dyn ErrorInterceptor>,
}
