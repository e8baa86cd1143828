//! Active tenant ("program") selection.
//!
//! The context is read fresh for every outgoing request. Callers receive a
//! snapshot, so switching programs never alters a request already dispatched.

use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::model::ProgramContext;
use crate::storage::{StateStore, KEY_PROGRAM_CONTEXT};

pub const PROGRAM_CONTEXT_HEADER: &str = "X-Program-Context";

pub struct ProgramContextManager {
    current: RwLock<Option<ProgramContext>>,
    store: Arc<dyn StateStore>,
}

impl ProgramContextManager {
    /// Create a manager, restoring any persisted context.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        let restored = match store.load(KEY_PROGRAM_CONTEXT) {
            Ok(Some(raw)) => match serde_json::from_str::<ProgramContext>(&raw) {
                Ok(context) => {
                    debug!("Restored program context {}", context.program_id);
                    Some(context)
                }
                Err(e) => {
                    warn!("Ignoring unreadable persisted program context: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load persisted program context: {}", e);
                None
            }
        };

        Self {
            current: RwLock::new(restored),
            store,
        }
    }

    pub fn set_context(&self, program_id: impl Into<String>, program_name: impl Into<String>) {
        self.set_full_context(ProgramContext {
            program_id: program_id.into(),
            program_name: program_name.into(),
            permissions: Vec::new(),
        });
    }

    pub fn set_full_context(&self, context: ProgramContext) {
        debug!("Switching program context to {}", context.program_id);
        match serde_json::to_string(&context) {
            Ok(raw) => {
                if let Err(e) = self.store.save(KEY_PROGRAM_CONTEXT, &raw) {
                    warn!("Failed to persist program context: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize program context: {}", e),
        }
        *self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(context);
    }

    /// Snapshot of the active context.
    pub fn get_context(&self) -> Option<ProgramContext> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear_context(&self) {
        debug!("Clearing program context");
        *self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        if let Err(e) = self.store.remove(KEY_PROGRAM_CONTEXT) {
            warn!("Failed to remove persisted program context: {}", e);
        }
    }
}
