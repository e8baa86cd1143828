//! Expiring response cache.
//!
//! Entries live for their TTL and the store is bounded by a maximum entry
//! count; when full, the least recently accessed entry is evicted. Every
//! write carries a version taken when its request was dispatched, and a write
//! never replaces a live entry written by a request dispatched later.
//! Invalidation leaves a version watermark behind, so a request dispatched
//! before the invalidation cannot put its older payload back.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::configuration::ClientConfig;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Cache configuration options
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL used when a request does not specify one
    pub default_ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl CacheConfig {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            enabled: config.enable_offline_cache,
            default_ttl: config.cache_ttl(),
            max_entries: config.cache_max_entries,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub data: serde_json::Value,
    pub written_at: DateTime<Utc>,
    pub ttl: Duration,
    pub version: u64,
    last_access: u64,
}

impl CacheEntry {
    /// Valid iff `now < written_at + ttl`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        // a TTL past the representable range never expires
        match chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.written_at.checked_add_signed(ttl))
        {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}

/// True when `key` is `prefix` itself or continues it with a path, query or
/// fragment separator.
fn key_under_prefix(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#']),
        None => false,
    }
}

#[derive(Default)]
struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    access_tick: u64,
    /// Writes with a version below this were dispatched before the last clear
    floor: u64,
    /// Same as `floor`, per invalidated prefix
    watermarks: BTreeMap<String, u64>,
}

impl CacheStore {
    fn touch(&mut self) -> u64 {
        self.access_tick += 1;
        self.access_tick
    }

    fn is_superseded(&self, key: &str, version: u64) -> bool {
        version < self.floor
            || self
                .watermarks
                .iter()
                .any(|(prefix, mark)| version < *mark && key_under_prefix(key, prefix))
    }

    fn evict_least_recently_used(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|entry| entry.last_access)
            .map(|entry| entry.key.clone());
        if let Some(key) = oldest {
            trace!("Evicting least recently used cache entry {}", key);
            self.entries.remove(&key);
        }
    }
}

pub struct CacheManager {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    store: Mutex<CacheStore>,
    next_version: AtomicU64,
}

impl CacheManager {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            store: Mutex::new(CacheStore::default()),
            next_version: AtomicU64::new(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.max_entries > 0
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Reserve a write version. Call when the producing request is dispatched.
    pub fn begin_write(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    fn store(&self) -> MutexGuard<'_, CacheStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_value(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Raw cached payload, if present and not expired.
    pub fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        if !self.is_enabled() {
            return None;
        }
        let now = self.clock.now();
        let mut store = self.store();
        let valid = store.entries.get(key).map(|entry| entry.is_valid(now))?;
        if !valid {
            debug!("Cache entry {} expired", key);
            store.entries.remove(key);
            return None;
        }
        let tick = store.touch();
        let entry = store.entries.get_mut(key)?;
        entry.last_access = tick;
        trace!("Cache hit for {}", key);
        Some(entry.data.clone())
    }

    pub fn set<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let value = serde_json::to_value(data)?;
        let version = self.begin_write();
        Ok(self.set_versioned(key, value, ttl, version))
    }

    /// Store `data` unless a live entry with a newer version already exists or
    /// the key was invalidated after `version` was reserved.
    /// Returns whether the write was applied.
    pub fn set_versioned(
        &self,
        key: &str,
        data: serde_json::Value,
        ttl: Option<Duration>,
        version: u64,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let mut store = self.store();

        if store.is_superseded(key, version) {
            debug!("Skipping cache write for {} invalidated after version {}", key, version);
            return false;
        }
        if let Some(existing) = store.entries.get(key) {
            if existing.is_valid(now) && existing.version > version {
                debug!(
                    "Skipping stale cache write for {} (version {} < {})",
                    key, version, existing.version
                );
                return false;
            }
        } else {
            while store.entries.len() >= self.config.max_entries {
                store.evict_least_recently_used();
            }
        }

        let tick = store.touch();
        store.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                data,
                written_at: now,
                ttl,
                version,
                last_access: tick,
            },
        );
        true
    }

    pub fn invalidate(&self, key: &str) {
        if self.store().entries.remove(key).is_some() {
            trace!("Invalidated cache entry {}", key);
        }
    }

    /// Remove every entry under `prefix` (the prefix itself, or followed by
    /// `/`, `?` or `#`). Returns the count removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mark = self.next_version.load(Ordering::SeqCst);
        let mut store = self.store();
        store.watermarks.insert(prefix.to_string(), mark);
        let before = store.entries.len();
        store.entries.retain(|key, _| !key_under_prefix(key, prefix));
        before - store.entries.len()
    }

    pub fn clear(&self) {
        let mark = self.next_version.load(Ordering::SeqCst);
        let mut store = self.store();
        store.entries.clear();
        // the floor covers every prefix recorded so far
        store.watermarks.clear();
        store.floor = mark;
        debug!("Cleared response cache");
    }

    pub fn len(&self) -> usize {
        self.store().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn manager(max_entries: usize) -> (CacheManager, ManualClock) {
        let clock = ManualClock::default();
        let config = CacheConfig {
            enabled: true,
            default_ttl: Duration::from_secs(300),
            max_entries,
        };
        (CacheManager::new(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (cache, clock) = manager(8);
        cache.set("k", &json!({"n": 1}), None).unwrap();

        clock.advance(Duration::from_secs(200));
        assert_eq!(cache.get_value("k"), Some(json!({"n": 1})));

        clock.advance(Duration::from_secs(110));
        assert_eq!(cache.get_value("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_per_entry_ttl_override() {
        let (cache, clock) = manager(8);
        cache.set("short", &1, Some(Duration::from_secs(5))).unwrap();
        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.get::<u32>("short"), None);
    }

    #[test]
    fn test_least_recently_accessed_is_evicted() {
        let (cache, _clock) = manager(2);
        cache.set("a", &1, None).unwrap();
        cache.set("b", &2, None).unwrap();
        // touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get::<u32>("a"), Some(1));
        cache.set("c", &3, None).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get::<u32>("a"), Some(1));
        assert_eq!(cache.get::<u32>("b"), None);
        assert_eq!(cache.get::<u32>("c"), Some(3));
    }

    #[test]
    fn test_older_write_does_not_replace_newer() {
        let (cache, _clock) = manager(8);
        let slow_request = cache.begin_write();
        let fast_request = cache.begin_write();

        assert!(cache.set_versioned("k", json!("fast"), None, fast_request));
        assert!(!cache.set_versioned("k", json!("slow"), None, slow_request));
        assert_eq!(cache.get_value("k"), Some(json!("fast")));
    }

    #[test]
    fn test_older_write_replaces_expired_entry() {
        let (cache, clock) = manager(8);
        let old = cache.begin_write();
        let new = cache.begin_write();
        cache.set_versioned("k", json!("new"), Some(Duration::from_secs(1)), new);
        clock.advance(Duration::from_secs(2));
        assert!(cache.set_versioned("k", json!("old"), None, old));
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = CacheManager::new(
            CacheConfig {
                enabled: false,
                default_ttl: Duration::from_secs(60),
                max_entries: 8,
            },
            Arc::new(ManualClock::default()),
        );
        assert!(!cache.set("k", &1, None).unwrap());
        assert_eq!(cache.get::<u32>("k"), None);
        assert!(!cache.is_enabled());
    }

    #[test]
    fn test_invalidate_prefix() {
        let (cache, _clock) = manager(8);
        cache.set("http://h/v1/students", &1, None).unwrap();
        cache.set("http://h/v1/students?page=2", &2, None).unwrap();
        cache.set("http://h/v1/courses", &3, None).unwrap();

        assert_eq!(cache.invalidate_prefix("http://h/v1/students"), 2);
        assert_eq!(cache.len(), 1);
        cache.invalidate("http://h/v1/courses");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_prefix_respects_segment_boundary() {
        let (cache, _clock) = manager(8);
        cache.set("http://h/v1/students#p1", &1, None).unwrap();
        cache.set("http://h/v1/students/4", &2, None).unwrap();
        cache.set("http://h/v1/students-archive", &3, None).unwrap();

        assert_eq!(cache.invalidate_prefix("http://h/v1/students"), 2);
        assert_eq!(cache.get::<u32>("http://h/v1/students-archive"), Some(3));
    }

    #[test]
    fn test_write_reserved_before_invalidation_is_rejected() {
        let (cache, _clock) = manager(8);
        let in_flight = cache.begin_write();
        cache.invalidate_prefix("http://h/v1/students");

        assert!(!cache.set_versioned("http://h/v1/students?page=1", json!("old"), None, in_flight));
        assert_eq!(cache.get_value("http://h/v1/students?page=1"), None);

        let later = cache.begin_write();
        assert!(cache.set_versioned("http://h/v1/students?page=1", json!("new"), None, later));
        // other collections are unaffected by the watermark
        assert!(cache.set_versioned("http://h/v1/courses", json!(1), None, in_flight));
    }

    #[test]
    fn test_write_reserved_before_clear_is_rejected() {
        let (cache, _clock) = manager(8);
        let in_flight = cache.begin_write();
        cache.clear();
        assert!(!cache.set_versioned("k", json!("previous session"), None, in_flight));
        assert!(cache.set("k", &1, None).unwrap());
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let (cache, clock) = manager(8);
        cache
            .set("k", &1, Some(Duration::from_secs(u64::MAX / 4)))
            .unwrap();
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert_eq!(cache.get::<u32>("k"), Some(1));
    }
}
