use std::fs;
use std::path::PathBuf;
use tracing::trace;

use crate::storage::{StateStore, StorageError};

pub const STATE_DIR_ENV: &str = "CAMPUS_STATE_DIR";

/// State store keeping one file per key in a local directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Store rooted at `$CAMPUS_STATE_DIR`, or `<data_dir>/campus/state`.
    pub fn default_location() -> Result<Self, StorageError> {
        if let Ok(state_dir) = std::env::var(STATE_DIR_ENV) {
            return Ok(Self::new(state_dir));
        }
        let mut directory = dirs::data_dir().ok_or(StorageError::NoStateDirectory)?;
        directory.push("campus");
        directory.push("state");
        Ok(Self::new(directory))
    }

    pub fn directory(&self) -> &PathBuf {
        &self.directory
    }

    fn file_path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.directory.join(format!("{}.json", file_name))
    }
}

impl StateStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.file_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.directory)?;
        let path = self.file_path(key);
        // atomic replace
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &path)?;
        trace!("Saved state entry {} to {:?}", key, path);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.file_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
