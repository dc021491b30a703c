//! Per-requirement claims.
//!
//! At most one decision runs for a requirement at a time, whether it comes
//! from the polling loop or from a manual trigger.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Exclusive lease on one requirement ID. Released on drop.
#[derive(Debug)]
pub struct Claim {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Debug, Default)]
pub struct ClaimRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(id.to_string()).or_default().clone()
    }

    /// Wait until `id` is free, then hold it.
    pub async fn claim(&self, id: &str) -> Claim {
        Claim {
            _guard: self.lock_for(id).lock_owned().await,
        }
    }

    /// Hold `id` if nobody else does.
    pub fn try_claim(&self, id: &str) -> Option<Claim> {
        self.lock_for(id)
            .try_lock_owned()
            .ok()
            .map(|guard| Claim { _guard: guard })
    }

    /// Drop the lock entry for `id` unless a claim is held or awaited.
    pub fn forget(&self, id: &str) {
        let mut locks = self.locks.lock();
        if locks.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
