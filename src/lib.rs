//! Resilient API client layer for the campus administration backend.
//!
//! The [`ApiClient`] wraps every call to the backend with bearer
//! authentication, single-flight token refresh, program (tenant) context
//! propagation, a TTL cache for reads, bounded retries with backoff, error
//! normalization, and an offline queue for mutations that is replayed when
//! connectivity returns.
//!
//! # Modules
//!
//! - `client`: the request pipeline and its builder
//! - `token_manager`: token storage, expiry and deduplicated refresh
//! - `program_context`: the active program and its header
//! - `cache`: TTL and LRU response cache
//! - `offline_queue`: persisted queue of mutations made while offline
//! - `interceptor`: request, response and error hooks
//! - `error`, `error_handler`: the normalized error taxonomy
//! - `storage`, `file_store`, `keyring`: persistence backends
//! - `network`, `clock`: injectable connectivity and time sources
//! - `configuration`: client settings loaded from YAML
//! - `commands`, `actions`, `format`: the `campus` command line tool

pub mod actions;
pub mod cache;
pub mod client;
pub mod clock;
pub mod commands;
pub mod configuration;
pub mod error;
pub mod error_handler;
pub mod exit_codes;
pub mod file_store;
pub mod format;
pub mod interceptor;
pub mod keyring;
pub mod model;
pub mod network;
pub mod offline_queue;
pub mod program_context;
pub mod storage;
pub mod token_manager;

pub use client::{ApiClient, ClientBuilder};
pub use configuration::ClientConfig;
pub use error::{ErrorCode, NormalizedError};
pub use model::{AuthState, NormalizedResponse, OfflineQueueEntry, ProgramContext, RequestSpec};
