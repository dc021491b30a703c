use std::path::Path;
use std::sync::Arc;

use reqwatch_core::RequirementSnapshot;

use crate::{JsonDirStore, KeyedStore, MemoryStore, StoreError};

/// Latest baseline snapshot per requirement.
#[derive(Clone)]
pub struct SnapshotStore {
    backend: Arc<dyn KeyedStore<RequirementSnapshot>>,
}

impl SnapshotStore {
    pub fn new(backend: impl KeyedStore<RequirementSnapshot> + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Durable store under `<state_dir>/snapshots`.
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(JsonDirStore::open(state_dir.join("snapshots"))?))
    }

    pub fn get(&self, requirement_id: &str) -> Result<Option<RequirementSnapshot>, StoreError> {
        let snapshot = self.backend.get(requirement_id)?;
        match snapshot {
            Some(s) if s.requirement_id != requirement_id => Err(StoreError::KeyMismatch {
                key: requirement_id.to_string(),
                id: s.requirement_id,
            }),
            other => Ok(other),
        }
    }

    /// Replace the stored snapshot for `snapshot.requirement_id`.
    pub fn put(&self, snapshot: &RequirementSnapshot) -> Result<(), StoreError> {
        if snapshot.requirement_id.is_empty() {
            return Err(StoreError::EmptyId);
        }
        self.backend.put(&snapshot.requirement_id, snapshot)
    }

    pub fn delete(&self, requirement_id: &str) -> Result<bool, StoreError> {
        self.backend.delete(requirement_id)
    }

    pub fn ids(&self) -> Result<Vec<String>, StoreError> {
        self.backend.ids()
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").finish_non_exhaustive()
    }
}
