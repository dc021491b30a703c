use std::path::Path;
use std::sync::Arc;

use reqwatch_core::RequirementProcessingState;

use crate::{JsonDirStore, KeyedStore, MemoryStore, StoreError};

/// Processing state per monitored requirement.
///
/// The set of IDs with a state entry is the set of monitored requirements.
#[derive(Clone)]
pub struct StateTracker {
    backend: Arc<dyn KeyedStore<RequirementProcessingState>>,
}

impl StateTracker {
    pub fn new(backend: impl KeyedStore<RequirementProcessingState> + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Durable tracker under `<state_dir>/states`.
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(JsonDirStore::open(state_dir.join("states"))?))
    }

    pub fn get(&self, requirement_id: &str) -> Result<Option<RequirementProcessingState>, StoreError> {
        self.backend.get(requirement_id)
    }

    pub fn put(&self, state: &RequirementProcessingState) -> Result<(), StoreError> {
        if state.requirement_id.is_empty() {
            return Err(StoreError::EmptyId);
        }
        self.backend.put(&state.requirement_id, state)
    }

    pub fn delete(&self, requirement_id: &str) -> Result<bool, StoreError> {
        self.backend.delete(requirement_id)
    }

    pub fn contains(&self, requirement_id: &str) -> Result<bool, StoreError> {
        Ok(self.backend.get(requirement_id)?.is_some())
    }

    /// Monitored requirement IDs, sorted.
    pub fn ids(&self) -> Result<Vec<String>, StoreError> {
        self.backend.ids()
    }

    /// Every stored state, in ID order. Entries deleted between listing and
    /// reading are skipped.
    pub fn all(&self) -> Result<Vec<RequirementProcessingState>, StoreError> {
        let mut states = Vec::new();
        for id in self.backend.ids()? {
            if let Some(state) = self.backend.get(&id)? {
                states.push(state);
            }
        }
        Ok(states)
    }
}

impl std::fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTracker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn at(h: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, h, 0, 0).unwrap()
    }

    #[test]
    fn read_after_write() {
        let tracker = StateTracker::in_memory();
        let mut state = RequirementProcessingState::new("R1", at(0));
        tracker.put(&state).unwrap();
        assert!(tracker.contains("R1").unwrap());

        state.record_extraction(at(1), false);
        tracker.put(&state).unwrap();
        assert_eq!(tracker.get("R1").unwrap().unwrap().extraction_count, 1);
    }

    #[test]
    fn all_lists_in_id_order() {
        let tracker = StateTracker::in_memory();
        for id in ["B", "A", "C"] {
            tracker
                .put(&RequirementProcessingState::new(id, at(0)))
                .unwrap();
        }
        let ids: Vec<_> = tracker
            .all()
            .unwrap()
            .into_iter()
            .map(|s| s.requirement_id)
            .collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn restart_reconstructs_state() {
        let tmp = TempDir::new().unwrap();
        let mut state = RequirementProcessingState::new("PROJ-3", at(0));
        state.record_extraction(at(1), false);
        state.record_failure(at(2), "tracker timed out");
        StateTracker::open(tmp.path()).unwrap().put(&state).unwrap();

        let reopened = StateTracker::open(tmp.path()).unwrap();
        assert_eq!(reopened.get("PROJ-3").unwrap(), Some(state));
        assert_eq!(reopened.ids().unwrap(), vec!["PROJ-3"]);
    }

    #[test]
    fn delete_removes_monitoring() {
        let tracker = StateTracker::in_memory();
        tracker
            .put(&RequirementProcessingState::new("R1", at(0)))
            .unwrap();
        assert!(tracker.delete("R1").unwrap());
        assert!(!tracker.contains("R1").unwrap());
    }
}
