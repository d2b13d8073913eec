//! Per-path upload locks.
//!
//! Chunks for the same `(owner, path)` are applied one at a time so that
//! starting, resuming and reaping an upload never interleave. Locks for
//! different paths are independent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockKey = (i64, String);

/// Table of per-path async locks.
///
/// Entries are created on demand and dropped when the last holder or
/// waiter goes away.
#[derive(Debug, Default)]
pub struct UploadLocks {
    slots: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

/// Held lock on one `(owner, path)`. Released on drop.
#[derive(Debug)]
pub struct UploadGuard<'a> {
    locks: &'a UploadLocks,
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock on `(owner_id, path)`.
    pub async fn acquire(&self, owner_id: i64, path: &str) -> UploadGuard<'_> {
        let key = (owner_id, path.to_string());
        let slot = self.slot(&key);
        let guard = slot.lock_owned().await;
        UploadGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    /// Take the lock on `(owner_id, path)` only if nobody holds it.
    pub fn try_acquire(&self, owner_id: i64, path: &str) -> Option<UploadGuard<'_>> {
        let key = (owner_id, path.to_string());
        let slot = self.slot(&key);
        match slot.try_lock_owned() {
            Ok(guard) => Some(UploadGuard {
                locks: self,
                key,
                guard: Some(guard),
            }),
            Err(_) => {
                self.forget_if_unused(&key);
                None
            }
        }
    }

    /// Number of paths with a holder or waiter.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn slot(&self, key: &LockKey) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.clone()).or_default().clone()
    }

    fn forget_if_unused(&self, key: &LockKey) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only handed out under the table lock, so a count of
        // one means the table holds the last reference.
        if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(key);
        }
    }
}

impl UploadGuard<'_> {
    /// Owner and path this guard covers.
    pub fn key(&self) -> (i64, &str) {
        (self.key.0, &self.key.1)
    }
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.forget_if_unused(&self.key);
    }
}
