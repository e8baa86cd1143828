//! Durable queue of mutating requests deferred while offline.
//!
//! Entries are replayed in enqueue order. Within one flush, once an entry
//! for a resource fails retryably, later entries for the same resource are
//! left queued so their relative order is preserved; entries for other
//! resources still proceed. Entries that fail deterministically, or exceed
//! their retry budget, are removed and reported as permanent failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ErrorCode, NormalizedError};
use crate::model::OfflineQueueEntry;
use crate::storage::{StateStore, KEY_OFFLINE_QUEUE};

const EVENT_BUFFER: usize = 64;

/// Per-entry replay lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplayState {
    Queued,
    Replaying,
    Succeeded,
    /// Left in the queue with its retry count bumped
    FailedRetryable,
    /// Removed from the queue
    FailedPermanent,
}

impl ReplayState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayState::Succeeded | ReplayState::FailedPermanent)
    }
}

/// Outcome for one entry of a flush.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub id: Uuid,
    pub method: String,
    pub url: String,
    /// `Queued` when the entry was deferred behind a failed same-resource entry
    pub state: ReplayState,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NormalizedError>,
}

/// Notifications about queue activity.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Enqueued(OfflineQueueEntry),
    Replayed { id: Uuid },
    PermanentFailure {
        entry: OfflineQueueEntry,
        error: NormalizedError,
    },
    Flushed {
        succeeded: usize,
        failed: usize,
        remaining: usize,
    },
}

/// Sends one queued entry to the backend.
#[async_trait]
pub trait ReplayExecutor: Send + Sync {
    async fn replay(&self, entry: &OfflineQueueEntry) -> Result<(), NormalizedError>;
}

pub struct OfflineQueueManager {
    entries: Mutex<VecDeque<OfflineQueueEntry>>,
    store: Arc<dyn StateStore>,
    events: broadcast::Sender<QueueEvent>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl OfflineQueueManager {
    /// Create a manager, restoring any persisted entries.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        let entries = match store.load(KEY_OFFLINE_QUEUE) {
            Ok(Some(raw)) => serde_json::from_str::<VecDeque<OfflineQueueEntry>>(&raw)
                .unwrap_or_else(|e| {
                    warn!("Ignoring unreadable persisted offline queue: {}", e);
                    VecDeque::new()
                }),
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!("Failed to load persisted offline queue: {}", e);
                VecDeque::new()
            }
        };
        if !entries.is_empty() {
            debug!("Restored {} queued request(s)", entries.len());
        }
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            entries: Mutex::new(entries),
            store,
            events,
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<OfflineQueueEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, entries: &VecDeque<OfflineQueueEntry>) {
        let result = if entries.is_empty() {
            self.store.remove(KEY_OFFLINE_QUEUE)
        } else {
            match serde_json::to_string(entries) {
                Ok(raw) => self.store.save(KEY_OFFLINE_QUEUE, &raw),
                Err(e) => {
                    warn!("Failed to serialize offline queue: {}", e);
                    return;
                }
            }
        };
        if let Err(e) = result {
            warn!("Failed to persist offline queue: {}", e);
        }
    }

    fn emit(&self, event: QueueEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn enqueue(&self, entry: OfflineQueueEntry) -> Uuid {
        let id = entry.id;
        {
            let mut entries = self.entries();
            entries.push_back(entry.clone());
            self.persist(&entries);
        }
        info!("Queued {} {} for replay ({})", entry.method, entry.url, id);
        self.emit(QueueEvent::Enqueued(entry));
        id
    }

    /// Entries awaiting replay, oldest first.
    pub fn pending(&self) -> Vec<OfflineQueueEntry> {
        self.entries().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if removed {
            self.persist(&entries);
        }
        removed
    }

    pub fn clear(&self) {
        let mut entries = self.entries();
        entries.clear();
        self.persist(&entries);
    }

    /// Replay every queued entry once, in enqueue order. Concurrent flushes
    /// run one after another. When the executor reports the network offline
    /// the flush stops and the rest stays queued with unchanged retry counts.
    pub async fn flush(&self, executor: &dyn ReplayExecutor) -> Vec<ReplayReport> {
        let _flushing = self.flush_lock.lock().await;
        let batch = self.pending();
        if batch.is_empty() {
            return Vec::new();
        }
        info!("Replaying {} queued request(s)", batch.len());

        let mut blocked: HashSet<String> = HashSet::new();
        let mut reports = Vec::with_capacity(batch.len());
        let mut went_offline = false;

        for entry in batch {
            if went_offline {
                reports.push(report(&entry, ReplayState::Queued, None));
                continue;
            }
            let resource = entry.resource_key().to_string();
            if blocked.contains(&resource) {
                debug!("Deferring {} behind an earlier failure on {}", entry.id, resource);
                reports.push(report(&entry, ReplayState::Queued, None));
                continue;
            }

            debug!("{:?} {} {}", ReplayState::Replaying, entry.method, entry.url);
            let outcome = executor.replay(&entry).await;
            if matches!(&outcome, Err(e) if e.is_offline()) {
                warn!("Network went offline during replay, stopping the flush");
                went_offline = true;
                reports.push(report(&entry, ReplayState::Queued, None));
                continue;
            }
            let state = match &outcome {
                Ok(()) => ReplayState::Succeeded,
                Err(e) if is_permanent(e) => ReplayState::FailedPermanent,
                Err(_) if entry.retry_count + 1 > entry.max_retries => ReplayState::FailedPermanent,
                Err(_) => ReplayState::FailedRetryable,
            };

            match (state, outcome) {
                (ReplayState::Succeeded, _) => {
                    self.remove(entry.id);
                    self.emit(QueueEvent::Replayed { id: entry.id });
                    reports.push(report(&entry, state, None));
                }
                (ReplayState::FailedRetryable, Err(e)) => {
                    let retry_count = self.bump_retry_count(entry.id);
                    warn!(
                        "Replay of {} failed ({}), attempt {} of {}",
                        entry.id, e.code, retry_count, entry.max_retries
                    );
                    blocked.insert(resource);
                    let mut r = report(&entry, state, Some(e));
                    r.retry_count = retry_count;
                    reports.push(r);
                }
                (_, Err(e)) => {
                    self.remove(entry.id);
                    error!("Dropping queued {} {}: {}", entry.method, entry.url, e);
                    self.emit(QueueEvent::PermanentFailure {
                        entry: entry.clone(),
                        error: e.clone(),
                    });
                    reports.push(report(&entry, ReplayState::FailedPermanent, Some(e)));
                }
                (_, Ok(())) => {}
            }
        }

        let succeeded = reports.iter().filter(|r| r.state == ReplayState::Succeeded).count();
        let failed = reports
            .iter()
            .filter(|r| r.state == ReplayState::FailedPermanent)
            .count();
        let remaining = self.len();
        info!(
            "Queue flush finished: {} succeeded, {} failed permanently, {} remaining",
            succeeded, failed, remaining
        );
        self.emit(QueueEvent::Flushed {
            succeeded,
            failed,
            remaining,
        });
        reports
    }

    fn bump_retry_count(&self, id: Uuid) -> u32 {
        let mut entries = self.entries();
        let count = match entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.retry_count += 1;
                entry.retry_count
            }
            None => 0,
        };
        self.persist(&entries);
        count
    }
}

fn is_permanent(error: &NormalizedError) -> bool {
    error.code.is_deterministic() || (error.code == ErrorCode::UnknownError && error.status >= 400)
}

fn report(entry: &OfflineQueueEntry, state: ReplayState, error: Option<NormalizedError>) -> ReplayReport {
    ReplayReport {
        id: entry.id,
        method: entry.method.clone(),
        url: entry.url.clone(),
        state,
        retry_count: entry.retry_count,
        error,
    }
}
