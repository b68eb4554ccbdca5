//! Registry of live execution contexts.
//!
//! The registry maps each live context's id to its [`TaskState`]. One mutex
//! serializes insertion, removal and the watchdog's full scan, so an entry
//! is never observed half-inserted or half-removed, and [`unregister`]
//! cannot return while a scan that already saw the entry is still running.
//!
//! [`unregister`]: ContextRegistry::unregister

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::logging::{debug, trace};
use crate::task::TaskState;

/// Opaque identifier of a context, taken from the caller's reference token.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(Vec<u8>);

impl ContextId {
    /// Create an id from raw reference bytes.
    pub fn new(reference: impl Into<Vec<u8>>) -> Self {
        Self(reference.into())
    }

    /// The raw reference bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId(\"{}\")", self.0.escape_ascii())
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<&[u8]> for ContextId {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

/// Shared table of live contexts.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: Mutex<HashMap<ContextId, Arc<TaskState>>>,
}

impl ContextRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking visitor cannot leave the map half-updated, so a poisoned
    // lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, HashMap<ContextId, Arc<TaskState>>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a context. Fails with [`Error::DuplicateId`] if `id` is live.
    pub fn register(&self, id: ContextId, task: Arc<TaskState>) -> Result<()> {
        let mut contexts = self.lock();
        if contexts.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        debug!(context = %id, live = contexts.len() + 1, "context registered");
        contexts.insert(id, task);
        Ok(())
    }

    /// Remove a context. Returns `false` if it was not registered.
    pub fn unregister(&self, id: &ContextId) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            debug!(context = %id, "context unregistered");
        }
        removed
    }

    /// Look up a live context's task state.
    pub fn lookup(&self, id: &ContextId) -> Result<Arc<TaskState>> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Visit every live context while holding the lock.
    ///
    /// The visitor must not block for long and must not call back into the
    /// registry; doing so deadlocks.
    pub fn for_each(&self, mut visitor: impl FnMut(&ContextId, &TaskState)) {
        let contexts = self.lock();
        for (id, task) in contexts.iter() {
            visitor(id, task);
        }
    }

    /// Cancel every running task that started at least `timeout` before `now`,
    /// a [`Clock`](crate::task::Clock) reading.
    ///
    /// Returns the ids of the tasks cancelled by this scan.
    pub fn cancel_overdue(&self, now: u64, timeout: Duration) -> Vec<ContextId> {
        let mut cancelled = Vec::new();
        self.for_each(|id, task| {
            if task.cancel_if_overdue(now, timeout) {
                trace!(context = %id, "task exceeded timeout");
                cancelled.push(id.clone());
            }
        });
        cancelled
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &ContextId) -> bool {
        self.lock().contains_key(id)
    }

    /// Ids of all live contexts, in no particular order.
    pub fn ids(&self) -> Vec<ContextId> {
        self.lock().keys().cloned().collect()
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no context is live.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
