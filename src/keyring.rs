use keyring::Entry;
use tracing::trace;

use crate::storage::{StateStore, StorageError};

pub const KEYRING_SERVICE: &str = "campus";

/// State store backed by the operating system keyring.
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> KeyringStore {
        KeyringStore {
            service: KEYRING_SERVICE.to_string(),
        }
    }
}

impl KeyringStore {
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(self.service.as_str(), key)?)
    }
}

impl StateStore for KeyringStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::from(e)),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        trace!("Writing keyring entry {}", key);
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::from(e)),
        }
    }
}
