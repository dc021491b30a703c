//! In-memory tracker and extractor doubles for orchestrator tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwatch_ai::GenerateError;
use reqwatch_core::{ArtifactKind, DraftArtifact, ExtractionOutcome, RequirementSnapshot};
use tokio_util::sync::CancellationToken;

use crate::{ExtractError, ExtractionCollaborator, RequirementFilter, TrackerClient, TrackerError};

#[derive(Default)]
pub struct FakeTracker {
    requirements: Mutex<BTreeMap<String, RequirementSnapshot>>,
    children: Mutex<HashMap<String, Vec<String>>>,
    failing_fetches: Mutex<HashMap<String, u32>>,
    reject_creates: AtomicBool,
    next_child: AtomicU64,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: &str, title: &str, description: &str, state: &str) {
        self.requirements.lock().insert(
            id.to_string(),
            RequirementSnapshot::new(id, title, description, state),
        );
    }

    pub fn remove(&self, id: &str) {
        self.requirements.lock().remove(id);
    }

    pub fn add_child(&self, parent: &str) {
        let n = self.next_child.fetch_add(1, Ordering::SeqCst);
        self.children
            .lock()
            .entry(parent.to_string())
            .or_default()
            .push(format!("child-{n}"));
    }

    pub fn children_of(&self, parent: &str) -> usize {
        self.children.lock().get(parent).map_or(0, Vec::len)
    }

    /// Next `times` fetches of `id` fail transiently.
    pub fn fail_fetches(&self, id: &str, times: u32) {
        self.failing_fetches.lock().insert(id.to_string(), times);
    }

    pub fn reject_creates(&self, reject: bool) {
        self.reject_creates.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl TrackerClient for FakeTracker {
    async fn fetch_requirement(&self, id: &str) -> Result<RequirementSnapshot, TrackerError> {
        {
            let mut failing = self.failing_fetches.lock();
            if let Some(remaining) = failing.get_mut(id).filter(|r| **r > 0) {
                *remaining -= 1;
                return Err(TrackerError::Unavailable("connection reset".into()));
            }
        }
        self.requirements
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }

    async fn list_requirements(&self, filter: &RequirementFilter) -> Result<Vec<String>, TrackerError> {
        let mut ids: Vec<String> = self.requirements.lock().keys().cloned().collect();
        if let Some(limit) = filter.limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    async fn child_items_exist(&self, parent_id: &str, _kind: ArtifactKind) -> Result<bool, TrackerError> {
        Ok(self.children_of(parent_id) > 0)
    }

    async fn create_child(
        &self,
        parent_id: &str,
        _kind: ArtifactKind,
        _draft: &DraftArtifact,
    ) -> Result<String, TrackerError> {
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(TrackerError::Server {
                status: 400,
                body: "rejected".into(),
            });
        }
        self.add_child(parent_id);
        Ok(format!("{parent_id}-child-{}", self.children_of(parent_id)))
    }
}

/// Records every call; can be told to fail or to fire a token mid-cycle.
#[derive(Default)]
pub struct FakeExtractor {
    calls: Mutex<Vec<String>>,
    failures: AtomicU32,
    empty: AtomicU32,
    cancel_on_call: Mutex<Option<CancellationToken>>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `times` calls fail transiently.
    pub fn fail_next(&self, times: u32) {
        self.failures.store(times, Ordering::SeqCst);
    }

    /// Next `times` calls return without producing any artifact.
    pub fn empty_next(&self, times: u32) {
        self.empty.store(times, Ordering::SeqCst);
    }

    pub fn cancel_on_call(&self, token: CancellationToken) {
        *self.cancel_on_call.lock() = Some(token);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ExtractionCollaborator for FakeExtractor {
    async fn extract_and_create(
        &self,
        requirement: &RequirementSnapshot,
        _kind: ArtifactKind,
        _upload: bool,
    ) -> Result<ExtractionOutcome, ExtractError> {
        let id = requirement.requirement_id.clone();
        self.calls.lock().push(id.clone());
        if let Some(token) = self.cancel_on_call.lock().as_ref() {
            token.cancel();
        }
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ExtractError::Generate(GenerateError::EmptyResponse));
        }
        let empty = self
            .empty
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if empty {
            return Ok(ExtractionOutcome::default());
        }
        Ok(ExtractionOutcome {
            created: vec![format!("{id}-story")],
            generated: 1,
            errors: Vec::new(),
        })
    }
}
