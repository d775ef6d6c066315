//! Per-entity sync locks.
//!
//! A non-blocking try-acquire keeps the scheduler and operator-triggered
//! syncs from double-running the same reconcile; the loser simply reports
//! `already-running`. The registry is in-process because the lock protects
//! a single process's fan-out, not cross-replica exclusivity (the DB
//! transaction provides that).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct SyncLocks {
    held: Mutex<HashSet<String>>,
}

impl SyncLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Try to take the named lock; `None` means a run is already active.
    pub fn try_acquire(self: &Arc<Self>, name: &str) -> Option<SyncLockGuard> {
        let mut held = self.held.lock().expect("sync lock registry poisoned");
        if !held.insert(name.to_string()) {
            return None;
        }
        Some(SyncLockGuard {
            registry: Arc::clone(self),
            name: name.to_string(),
        })
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .lock()
            .expect("sync lock registry poisoned")
            .contains(name)
    }
}

/// Releases the named lock on drop, including on error unwinds.
pub struct SyncLockGuard {
    registry: Arc<SyncLocks>,
    name: String,
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.registry.held.lock() {
            held.remove(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let locks = SyncLocks::new();

        let guard = locks.try_acquire("products").expect("first acquire");
        assert!(locks.try_acquire("products").is_none());
        assert!(locks.try_acquire("stores").is_some(), "other names are free");

        drop(guard);
        assert!(locks.try_acquire("products").is_some());
    }

    #[test]
    fn guard_releases_on_drop_mid_scope() {
        let locks = SyncLocks::new();
        {
            let _g = locks.try_acquire("employees").unwrap();
            assert!(locks.is_held("employees"));
        }
        assert!(!locks.is_held("employees"));
    }
}
