//! Persistence of client state across process restarts.
//!
//! Tokens, the active program context and the offline queue are each stored
//! under their own namespaced key. Values are opaque strings (JSON encoded by
//! the owning manager).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const KEY_ACCESS_TOKEN: &str = "campus.auth.access_token";
pub const KEY_REFRESH_TOKEN: &str = "campus.auth.refresh_token";
pub const KEY_EXPIRES_AT: &str = "campus.auth.expires_at";
pub const KEY_PROGRAM_CONTEXT: &str = "campus.program_context";
pub const KEY_OFFLINE_QUEUE: &str = "campus.offline_queue";

const SECRET_KEY_PREFIX: &str = "campus.auth.";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("keyring error: {0}")]
    KeyringError(#[from] keyring::Error),
    #[error("failed to resolve the state directory")]
    NoStateDirectory,
}

/// Key/value persistence capability.
pub trait StateStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Non-persistent store, used by tests and throwaway clients.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values().remove(key);
        Ok(())
    }
}

/// Routes `campus.auth.*` keys to a secrets store and everything else to a
/// general state store.
pub struct SplitStore {
    secrets: Arc<dyn StateStore>,
    state: Arc<dyn StateStore>,
}

impl SplitStore {
    pub fn new(secrets: Arc<dyn StateStore>, state: Arc<dyn StateStore>) -> Self {
        Self { secrets, state }
    }

    fn route(&self, key: &str) -> &dyn StateStore {
        if key.starts_with(SECRET_KEY_PREFIX) {
            self.secrets.as_ref()
        } else {
            self.state.as_ref()
        }
    }
}

impl StateStore for SplitStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.route(key).load(key)
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.route(key).save(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.route(key).remove(key)
    }
}
