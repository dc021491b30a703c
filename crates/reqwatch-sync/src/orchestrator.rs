//! Sync orchestrator: drives one decision cycle per requirement.
//!
//! Per requirement: fetch → fingerprint/score against the baseline → decide →
//! extract if asked → commit. Every mutation happens in the commit step, after
//! the extraction collaborator has returned. The snapshot is written first and
//! rolled back if the state write fails, so the stores never disagree about
//! what was extracted.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use parking_lot::RwLock;
use reqwatch_core::{
    Change, ChangeRecord, ContentHash, Decision, DecisionEngine, DecisionInput, ExtractionOutcome,
    Field, FieldWeights, MonitorConfig, MonitorStatistics, RequirementProcessingState,
    RequirementSnapshot, RequirementStatistics, Scorer, SkipReason, Trigger,
};
use reqwatch_store::{SnapshotStore, StateTracker};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::retry::with_retry;
use crate::{
    ClaimRegistry, Clock, ExtractionCollaborator, RequirementFilter, SyncError, SystemClock,
    TrackerClient, TrackerError,
};

/// Outcome of one requirement's check.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleResult {
    /// Content differs from the baseline, or there was no baseline.
    pub has_changes: bool,
    /// `None` when the check failed before a decision was made.
    pub decision: Option<Decision>,
    pub skip_reason: Option<SkipReason>,
    pub score: Option<f64>,
    pub fields_changed: BTreeSet<Field>,
    pub extraction_outcome: Option<ExtractionOutcome>,
    pub error: Option<String>,
    /// The tracker does not know the requirement. Nothing was changed.
    pub not_found: bool,
}

impl CycleResult {
    fn failed(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    fn not_found(id: &str) -> Self {
        Self {
            error: Some(format!("requirement {id} not found")),
            not_found: true,
            ..Self::default()
        }
    }

    /// Extraction ran and its result was committed.
    pub fn extracted(&self) -> bool {
        self.error.is_none() && self.extraction_outcome.is_some()
    }
}

/// Fetched content compared against the stored baseline.
struct Observation {
    current: RequirementSnapshot,
    fingerprint: ContentHash,
    baseline: Option<RequirementSnapshot>,
    change: Change,
    fields: BTreeSet<Field>,
}

impl Observation {
    fn new(
        current: RequirementSnapshot,
        baseline: Option<RequirementSnapshot>,
        weights: FieldWeights,
    ) -> Self {
        let fingerprint = current.fingerprint();
        let (change, fields) = match &baseline {
            None => (Change::NoBaseline, BTreeSet::new()),
            Some(old) if old.fingerprint() == fingerprint => (Change::Unchanged, BTreeSet::new()),
            Some(old) => {
                let assessment = Scorer::new(weights).assess(old, &current);
                (
                    Change::Changed {
                        score: assessment.score,
                    },
                    assessment.diff.fields(),
                )
            }
        };
        Self {
            current,
            fingerprint,
            baseline,
            change,
            fields,
        }
    }

    fn id(&self) -> &str {
        &self.current.requirement_id
    }

    fn score(&self) -> f64 {
        match self.change {
            Change::NoBaseline => 1.0,
            Change::Unchanged => 0.0,
            Change::Changed { score } => score,
        }
    }

    fn has_changes(&self) -> bool {
        self.change != Change::Unchanged
    }

    fn record(&self, at: DateTime<Utc>, trigger: Trigger, decision: Decision) -> ChangeRecord {
        ChangeRecord {
            from_hash: self.baseline.as_ref().map(RequirementSnapshot::fingerprint),
            to_hash: self.fingerprint.clone(),
            significance: self.score(),
            detected_at: at,
            trigger,
            fields_changed: self.fields.clone(),
            decision,
        }
    }

    fn result(&self, decision: Decision, skip_reason: Option<SkipReason>) -> CycleResult {
        CycleResult {
            has_changes: self.has_changes(),
            decision: Some(decision),
            skip_reason,
            score: Some(self.score()),
            fields_changed: self.fields.clone(),
            ..CycleResult::default()
        }
    }
}

pub struct Orchestrator {
    config: RwLock<Arc<MonitorConfig>>,
    tracker: Arc<dyn TrackerClient>,
    extractor: Arc<dyn ExtractionCollaborator>,
    snapshots: SnapshotStore,
    states: StateTracker,
    claims: ClaimRegistry,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        config: MonitorConfig,
        tracker: Arc<dyn TrackerClient>,
        extractor: Arc<dyn ExtractionCollaborator>,
        snapshots: SnapshotStore,
        states: StateTracker,
    ) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            tracker,
            extractor,
            snapshots,
            states,
            claims: ClaimRegistry::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configuration for the next cycle. A cycle keeps the one it started with.
    pub fn config(&self) -> Arc<MonitorConfig> {
        self.config.read().clone()
    }

    /// Replace the configuration. Cycles already running are unaffected.
    pub fn set_config(&self, config: MonitorConfig) {
        *self.config.write() = Arc::new(config);
    }

    // ── Cycles ──

    /// Check every monitored requirement once.
    pub async fn run_monitored(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<BTreeMap<String, CycleResult>, SyncError> {
        let ids = self.monitored_ids()?;
        Ok(self.run_cycle_until(&ids, shutdown).await)
    }

    /// Check each distinct ID once. Failures are per requirement and never
    /// stop the cycle.
    pub async fn run_cycle(&self, ids: &[String]) -> BTreeMap<String, CycleResult> {
        self.run_cycle_until(ids, &CancellationToken::new()).await
    }

    /// Like [`run_cycle`](Self::run_cycle), but stops picking up new IDs once
    /// `shutdown` fires. Checks already in flight run to completion.
    pub async fn run_cycle_until(
        &self,
        ids: &[String],
        shutdown: &CancellationToken,
    ) -> BTreeMap<String, CycleResult> {
        let config = self.config();
        let config = &*config;
        let started = Instant::now();

        let mut seen = HashSet::new();
        let distinct: Vec<String> = ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .map(str::to_string)
            .collect();
        let requested = distinct.len();

        // `buffer_unordered` only pulls the next ID when a slot frees up, so
        // IDs not yet started when `shutdown` fires are skipped.
        let checked: Vec<Option<(String, CycleResult)>> = stream::iter(distinct)
            .map(move |id: String| async move {
                if shutdown.is_cancelled() {
                    return None;
                }
                let result = self.check_one(config, &id).await;
                Some((id, result))
            })
            .buffer_unordered(config.max_concurrent_syncs.max(1))
            .collect()
            .await;
        let results: BTreeMap<String, CycleResult> = checked.into_iter().flatten().collect();

        info!(
            requested,
            processed = results.len(),
            extracted = results.values().filter(|r| r.extracted()).count(),
            errors = results.values().filter(|r| r.error.is_some()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle complete"
        );
        results
    }

    async fn check_one(&self, config: &MonitorConfig, id: &str) -> CycleResult {
        let _claim = self.claims.claim(id).await;
        self.check_claimed(config, id).await.unwrap_or_else(|e| {
            error!(requirement_id = id, error = %e, "check failed");
            CycleResult::failed(e)
        })
    }

    async fn check_claimed(&self, config: &MonitorConfig, id: &str) -> Result<CycleResult, SyncError> {
        let state = self.states.get(id)?;
        let current = match self.fetch(config, id).await {
            Ok(current) => current,
            Err(TrackerError::NotFound(_)) => {
                warn!(requirement_id = id, "requirement not found in tracker");
                return Ok(CycleResult::not_found(id));
            }
            Err(e) => return self.record_check_failure(config, id, state, e.to_string()),
        };
        let now = self.clock.now();
        let obs = Observation::new(current, self.snapshots.get(id)?, config.field_weights);

        let unchanged = state
            .as_ref()
            .filter(|s| s.artifacts_extracted && obs.change == Change::Unchanged);
        if let Some(prior) = unchanged {
            debug!(requirement_id = id, hash = %obs.fingerprint.short(), "fingerprint unchanged");
            if prior.consecutive_errors > 0 {
                let mut state = prior.clone();
                state.clear_errors();
                state.last_checked_at = Some(now);
                self.states.put(&state)?;
            }
            return Ok(obs.result(Decision::Skip, Some(SkipReason::Unchanged)));
        }

        let engine = DecisionEngine::new(config);
        let existing_artifacts = if engine.needs_duplicate_check(state.as_ref()) {
            let kind = config.artifact_kind;
            match with_retry(&config.retry, "duplicate check", || {
                self.tracker.child_items_exist(id, kind)
            })
            .await
            {
                Ok(exists) => Some(exists),
                Err(e) => return self.record_check_failure(config, id, state, e.to_string()),
            }
        } else {
            None
        };

        let verdict = engine.decide(DecisionInput {
            state: state.as_ref(),
            change: obs.change,
            existing_artifacts,
            now,
        });
        let mut state = state.unwrap_or_else(|| RequirementProcessingState::new(id, now));
        state.last_checked_at = Some(now);

        if verdict.decision.requires_extraction() {
            return self
                .extract(config, &obs, state, verdict.decision, Trigger::Automatic, now)
                .await;
        }

        state.clear_errors();
        if obs.has_changes() {
            state.record_change(
                obs.record(now, Trigger::Automatic, Decision::Skip),
                config.history_limit,
            );
        }
        if verdict.adopt_existing {
            info!(requirement_id = id, "child artifacts already exist, adopting");
            state.adopt_existing();
        }
        // The baseline moves only to content whose artifacts exist, or to
        // first-seen content that will not be extracted automatically.
        let advance_baseline = verdict.adopt_existing
            || matches!(
                verdict.skip_reason,
                Some(SkipReason::NoBaseline | SkipReason::AutoExtractDisabled)
            );
        self.commit(
            id,
            advance_baseline.then_some(&obs.current),
            obs.baseline.as_ref(),
            &state,
        )?;

        info!(
            requirement_id = id,
            decision = %verdict.decision,
            reason = ?verdict.skip_reason,
            score = obs.score(),
            "skipping"
        );
        Ok(obs.result(verdict.decision, verdict.skip_reason))
    }

    async fn fetch(&self, config: &MonitorConfig, id: &str) -> Result<RequirementSnapshot, TrackerError> {
        let mut snapshot = with_retry(&config.retry, "fetch requirement", || {
            self.tracker.fetch_requirement(id)
        })
        .await?;
        snapshot.requirement_id = id.to_string();
        Ok(snapshot.captured(self.clock.now()))
    }

    async fn extract(
        &self,
        config: &MonitorConfig,
        obs: &Observation,
        mut state: RequirementProcessingState,
        decision: Decision,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<CycleResult, SyncError> {
        let id = obs.id();
        let mut result = obs.result(decision, None);
        info!(requirement_id = id, decision = %decision, score = obs.score(), "extracting");

        let attempt = with_retry(&config.retry, "extraction", || {
            self.extractor
                .extract_and_create(&obs.current, config.artifact_kind, config.upload)
        })
        .await;

        match attempt {
            Ok(outcome) if outcome.is_success(config.upload) => {
                if !outcome.errors.is_empty() {
                    warn!(
                        requirement_id = id,
                        errors = outcome.errors.len(),
                        "extraction partially failed"
                    );
                }
                state.record_extraction(now, decision.is_change_based());
                state.record_change(obs.record(now, trigger, decision), config.history_limit);
                self.commit(id, Some(&obs.current), obs.baseline.as_ref(), &state)?;
                info!(
                    requirement_id = id,
                    created = outcome.created.len(),
                    extraction_count = state.extraction_count,
                    "extraction complete"
                );
                result.extraction_outcome = Some(outcome);
            }
            other => {
                let (message, outcome) = match other {
                    Ok(outcome) if outcome.errors.is_empty() => {
                        ("extraction produced no artifacts".to_string(), Some(outcome))
                    }
                    Ok(outcome) => (
                        format!("extraction failed: {}", outcome.errors.join("; ")),
                        Some(outcome),
                    ),
                    Err(e) => (e.to_string(), None),
                };
                state.record_extraction_failure(now, message.clone());
                self.commit(id, None, None, &state)?;
                warn!(
                    requirement_id = id,
                    error = %message,
                    consecutive_errors = state.consecutive_errors,
                    "extraction failed"
                );
                self.warn_if_flagged(config, &state);
                result.extraction_outcome = outcome;
                result.error = Some(message);
            }
        }
        Ok(result)
    }

    fn record_check_failure(
        &self,
        config: &MonitorConfig,
        id: &str,
        state: Option<RequirementProcessingState>,
        message: String,
    ) -> Result<CycleResult, SyncError> {
        let now = self.clock.now();
        let mut state = state.unwrap_or_else(|| RequirementProcessingState::new(id, now));
        state.record_failure(now, message.clone());
        state.last_checked_at = Some(now);
        self.states.put(&state)?;
        warn!(
            requirement_id = id,
            error = %message,
            consecutive_errors = state.consecutive_errors,
            "check failed"
        );
        self.warn_if_flagged(config, &state);
        Ok(CycleResult::failed(message))
    }

    fn warn_if_flagged(&self, config: &MonitorConfig, state: &RequirementProcessingState) {
        if state.is_flagged(config.error_flag_threshold) {
            warn!(
                requirement_id = %state.requirement_id,
                consecutive_errors = state.consecutive_errors,
                "requirement flagged after repeated failures"
            );
        }
    }

    /// Write the new baseline (if any) and the state. A failed state write
    /// restores the previous baseline.
    fn commit(
        &self,
        id: &str,
        snapshot: Option<&RequirementSnapshot>,
        previous: Option<&RequirementSnapshot>,
        state: &RequirementProcessingState,
    ) -> Result<(), SyncError> {
        let Some(snapshot) = snapshot else {
            self.states.put(state)?;
            return Ok(());
        };

        self.snapshots.put(snapshot)?;
        if let Err(e) = self.states.put(state) {
            let rollback = match previous {
                Some(previous) => self.snapshots.put(previous),
                None => self.snapshots.delete(id).map(|_| ()),
            };
            match rollback {
                Ok(()) => warn!(requirement_id = id, error = %e, "state write failed, snapshot rolled back"),
                Err(rollback_err) => error!(
                    requirement_id = id,
                    error = %e,
                    rollback_error = %rollback_err,
                    "state write failed and snapshot rollback failed"
                ),
            }
            return Err(e.into());
        }
        Ok(())
    }

    // ── Manual triggers ──

    /// Run one check for a monitored requirement now.
    pub async fn force_check(&self, id: &str) -> Result<CycleResult, SyncError> {
        let config = self.config();
        let _claim = self.claims.claim(id).await;
        self.ensure_monitored(&config, id)?;
        self.check_claimed(&config, id).await
    }

    /// Extract regardless of threshold, cap, and cooldown.
    pub async fn force_extract(&self, id: &str) -> Result<CycleResult, SyncError> {
        let config = self.config();
        DecisionEngine::new(&config).manual_override()?;
        let _claim = self.claims.claim(id).await;
        self.ensure_monitored(&config, id)?;

        let state = self.states.get(id)?;
        let current = match self.fetch(&config, id).await {
            Ok(current) => current,
            Err(TrackerError::NotFound(_)) => return Ok(CycleResult::not_found(id)),
            Err(e) => return self.record_check_failure(&config, id, state, e.to_string()),
        };
        let now = self.clock.now();
        let obs = Observation::new(current, self.snapshots.get(id)?, config.field_weights);
        let mut state = state.unwrap_or_else(|| RequirementProcessingState::new(id, now));
        state.last_checked_at = Some(now);

        info!(requirement_id = id, "manual override");
        self.extract(&config, &obs, state, Decision::ForceExtract, Trigger::ManualOverride, now)
            .await
    }

    /// Forget extraction history for a requirement, then check it again.
    ///
    /// The check sees an unextracted requirement: existing child artifacts are
    /// adopted, otherwise extraction runs.
    pub async fn force_reset(&self, id: &str) -> Result<CycleResult, SyncError> {
        let config = self.config();
        let _claim = self.claims.claim(id).await;
        self.ensure_monitored(&config, id)?;

        if let Some(mut state) = self.states.get(id)? {
            state.reset();
            self.states.put(&state)?;
            info!(requirement_id = id, "processing state reset");
        }
        self.check_claimed(&config, id).await
    }

    // ── Monitoring set ──

    /// Start monitoring `id` and check it immediately.
    pub async fn add_requirement(&self, id: &str) -> Result<CycleResult, SyncError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(SyncError::EmptyId);
        }
        let config = self.config();
        let _claim = self.claims.claim(id).await;
        if !self.states.contains(id)? {
            self.states
                .put(&RequirementProcessingState::new(id, self.clock.now()))?;
            info!(requirement_id = id, "added to monitoring");
        }
        self.check_claimed(&config, id).await
    }

    /// Stop monitoring `id`, deleting its state and baseline. IDs listed in
    /// the configuration come back on the next cycle.
    pub async fn remove_requirement(&self, id: &str) -> Result<bool, SyncError> {
        let existed = {
            let _claim = self.claims.claim(id).await;
            let existed = self.states.delete(id)?;
            self.snapshots.delete(id)?;
            existed
        };
        self.claims.forget(id);
        if existed {
            info!(requirement_id = id, "removed from monitoring");
        }
        Ok(existed)
    }

    /// Requirements with a state entry plus those listed in the configuration.
    pub fn monitored_ids(&self) -> Result<Vec<String>, SyncError> {
        let config = self.config();
        let mut ids: BTreeSet<String> = self.states.ids()?.into_iter().collect();
        ids.extend(config.requirement_ids.iter().cloned());
        Ok(ids.into_iter().collect())
    }

    /// Tracker requirements matching `filter` that are not monitored yet.
    pub async fn discover(&self, filter: &RequirementFilter) -> Result<Vec<String>, SyncError> {
        let config = self.config();
        let listed = with_retry(&config.retry, "list requirements", || {
            self.tracker.list_requirements(filter)
        })
        .await?;
        let monitored: HashSet<String> = self.monitored_ids()?.into_iter().collect();
        let fresh: Vec<String> = listed
            .into_iter()
            .filter(|id| !monitored.contains(id))
            .collect();
        info!(found = fresh.len(), "discovered requirements");
        Ok(fresh)
    }

    fn ensure_monitored(&self, config: &MonitorConfig, id: &str) -> Result<(), SyncError> {
        if config.requirement_ids.iter().any(|c| c == id) || self.states.contains(id)? {
            Ok(())
        } else {
            Err(SyncError::NotMonitored(id.to_string()))
        }
    }

    // ── Statistics ──

    pub fn statistics(&self) -> Result<MonitorStatistics, SyncError> {
        let config = self.config();
        let states = self.states.all()?;
        Ok(MonitorStatistics::aggregate(&states, config.error_flag_threshold))
    }

    pub fn requirement_statistics(&self, id: &str) -> Result<Option<RequirementStatistics>, SyncError> {
        let threshold = self.config().error_flag_threshold;
        Ok(self
            .states
            .get(id)?
            .map(|state| RequirementStatistics::from_state(&state, threshold)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};
    use reqwatch_core::{Backoff, RetryPolicy};
    use reqwatch_store::{JsonDirStore, KeyedStore, MemoryStore, StoreError};
    use tempfile::TempDir;

    use crate::ManualClock;
    use crate::testing::{FakeExtractor, FakeTracker};

    struct Harness {
        orch: Orchestrator,
        tracker: Arc<FakeTracker>,
        extractor: Arc<FakeExtractor>,
        clock: Arc<ManualClock>,
        snapshots: SnapshotStore,
        states: StateTracker,
    }

    impl Harness {
        async fn cycle(&self, id: &str) -> CycleResult {
            let mut results = self.orch.run_cycle(&[id.to_string()]).await;
            results.remove(id).unwrap()
        }

        fn state(&self, id: &str) -> RequirementProcessingState {
            self.states.get(id).unwrap().unwrap()
        }

        fn baseline(&self, id: &str) -> RequirementSnapshot {
            self.snapshots.get(id).unwrap().unwrap()
        }

        fn later(&self, hours: i64) {
            self.clock.advance(TimeDelta::hours(hours));
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            retry: RetryPolicy::none(),
            ..MonitorConfig::default()
        }
    }

    fn harness(config: MonitorConfig) -> Harness {
        harness_with(config, SnapshotStore::in_memory(), StateTracker::in_memory())
    }

    fn harness_with(config: MonitorConfig, snapshots: SnapshotStore, states: StateTracker) -> Harness {
        let tracker = Arc::new(FakeTracker::new());
        let extractor = Arc::new(FakeExtractor::new());
        let clock = Arc::new(ManualClock::new(start()));
        let orch = Orchestrator::new(
            config,
            tracker.clone(),
            extractor.clone(),
            snapshots.clone(),
            states.clone(),
        )
        .with_clock(clock.clone());
        Harness {
            orch,
            tracker,
            extractor,
            clock,
            snapshots,
            states,
        }
    }

    /// Harness with R1 seen and extracted once at `start()`.
    async fn extracted(config: MonitorConfig) -> Harness {
        let h = harness(config);
        h.tracker.set("R1", "Add login", "Users sign in with email", "New");
        let result = h.cycle("R1").await;
        assert_eq!(result.decision, Some(Decision::ExtractNew));
        h
    }

    fn rewrite(h: &Harness) {
        h.tracker.set(
            "R1",
            "Export monthly reports",
            "Finance exports CSV and PDF summaries",
            "Active",
        );
    }

    // ── Decisions ──

    #[tokio::test]
    async fn unseen_requirement_extracts_new() {
        let h = harness(config());
        h.tracker.set("R1", "Add login", "Users sign in with email", "New");

        let result = h.cycle("R1").await;
        assert_eq!(result.decision, Some(Decision::ExtractNew));
        assert!(result.has_changes);
        assert_eq!(result.score, Some(1.0));
        assert!(result.extracted());
        assert_eq!(h.extractor.calls(), vec!["R1"]);

        let state = h.state("R1");
        assert!(state.artifacts_extracted);
        assert_eq!(state.extraction_count, 1);
        assert_eq!(state.change_extraction_count, 0);
        assert_eq!(state.last_extraction_at, Some(start()));
        assert_eq!(state.change_history.len(), 1);
        assert_eq!(state.change_history[0].from_hash, None);
        assert_eq!(state.change_history[0].decision, Decision::ExtractNew);
        assert_eq!(h.baseline("R1").title, "Add login");
    }

    #[tokio::test]
    async fn second_cycle_is_idempotent() {
        let h = extracted(config()).await;
        let before = h.state("R1");
        h.later(1);

        let result = h.cycle("R1").await;
        assert_eq!(result.decision, Some(Decision::Skip));
        assert_eq!(result.skip_reason, Some(SkipReason::Unchanged));
        assert_eq!(result.score, Some(0.0));
        assert!(!result.has_changes);
        assert_eq!(h.extractor.call_count(), 1);
        assert_eq!(h.state("R1"), before);
        assert_eq!(h.state("R1").last_checked_at, Some(start()));
    }

    #[tokio::test]
    async fn state_only_change_skips() {
        let h = extracted(config()).await;
        h.tracker.set("R1", "Add login", "Users sign in with email", "Active");
        h.later(2);

        let result = h.cycle("R1").await;
        assert_eq!(result.decision, Some(Decision::Skip));
        assert_eq!(result.skip_reason, Some(SkipReason::BelowThreshold));
        assert_eq!(result.score, Some(0.2));
        assert_eq!(result.fields_changed, BTreeSet::from([Field::State]));
        assert_eq!(h.extractor.call_count(), 1);
        // Recorded, but the baseline stays at the extracted content.
        assert_eq!(h.state("R1").change_history.len(), 2);
        assert_eq!(h.baseline("R1").state, "New");
    }

    #[tokio::test]
    async fn minor_title_edit_skips() {
        let h = extracted(config()).await;
        h.tracker
            .set("R1", "Add login with MFA", "Users sign in with email", "New");
        h.later(2);

        let result = h.cycle("R1").await;
        assert_eq!(result.skip_reason, Some(SkipReason::BelowThreshold));
        let score = result.score.unwrap();
        assert!(score > 0.0 && score < 0.4, "got {score}");
    }

    #[tokio::test]
    async fn full_rewrite_extracts_on_change() {
        let h = extracted(config()).await;
        rewrite(&h);
        h.later(2);

        let result = h.cycle("R1").await;
        assert_eq!(result.decision, Some(Decision::ExtractOnChange));
        assert!(result.score.unwrap() >= 0.4);
        let state = h.state("R1");
        assert_eq!(state.extraction_count, 2);
        assert_eq!(state.change_extraction_count, 1);
        assert_eq!(h.baseline("R1").title, "Export monthly reports");

        // The new content is the baseline now.
        let again = h.cycle("R1").await;
        assert_eq!(again.skip_reason, Some(SkipReason::Unchanged));
    }

    #[tokio::test]
    async fn cooldown_defers_extraction() {
        let h = extracted(MonitorConfig {
            cooldown: Duration::from_secs(3600),
            ..config()
        })
        .await;
        rewrite(&h);

        h.clock.advance(TimeDelta::minutes(30));
        let result = h.cycle("R1").await;
        assert_eq!(result.skip_reason, Some(SkipReason::CoolingDown));
        assert_eq!(h.baseline("R1").title, "Add login");

        h.clock.advance(TimeDelta::minutes(31));
        let result = h.cycle("R1").await;
        assert_eq!(result.decision, Some(Decision::ExtractOnChange));
        assert_eq!(h.extractor.call_count(), 2);
    }

    #[tokio::test]
    async fn cap_blocks_but_still_records() {
        let h = extracted(MonitorConfig {
            max_changes_per_requirement: 1,
            ..config()
        })
        .await;

        rewrite(&h);
        h.later(2);
        assert_eq!(h.cycle("R1").await.decision, Some(Decision::ExtractOnChange));

        h.tracker
            .set("R1", "Import budgets", "Upload spreadsheets", "Closed");
        h.later(2);
        let result = h.cycle("R1").await;
        assert_eq!(result.skip_reason, Some(SkipReason::CapReached));
        assert_eq!(h.extractor.call_count(), 2);

        let state = h.state("R1");
        let last = state.change_history.back().unwrap();
        assert_eq!(last.decision, Decision::Skip);
        let expected =
            RequirementSnapshot::new("R1", "Import budgets", "Upload spreadsheets", "Closed");
        assert_eq!(last.to_hash, expected.fingerprint());
    }

    #[tokio::test]
    async fn below_threshold_change_is_recorded_once() {
        let h = extracted(config()).await;
        h.tracker.set("R1", "Add login", "Users sign in with email", "Active");
        for _ in 0..3 {
            h.later(1);
            h.cycle("R1").await;
        }
        assert_eq!(h.state("R1").change_history.len(), 2);
    }

    // ── Failures ──

    #[tokio::test]
    async fn transient_extraction_failure_recurs() {
        let h = extracted(config()).await;
        rewrite(&h);
        h.later(2);
        h.extractor.fail_next(1);

        let failed = h.cycle("R1").await;
        assert_eq!(failed.decision, Some(Decision::ExtractOnChange));
        assert!(failed.error.is_some());
        assert!(!failed.extracted());
        let state = h.state("R1");
        assert_eq!(state.extraction_count, 1);
        assert_eq!(state.consecutive_errors, 1);
        assert!(state.last_error.is_some());
        assert_eq!(h.baseline("R1").title, "Add login");

        let retried = h.cycle("R1").await;
        assert_eq!(retried.decision, Some(Decision::ExtractOnChange));
        assert!(retried.extracted());
        let state = h.state("R1");
        assert_eq!(state.extraction_count, 2);
        assert_eq!(state.consecutive_errors, 0);
        assert_eq!(state.extractions_succeeded, 2);
        assert_eq!(state.extractions_failed, 1);
    }

    #[tokio::test]
    async fn empty_extraction_is_a_failure() {
        let h = harness(config());
        h.tracker.set("R1", "Add login", "Users sign in with email", "New");
        h.extractor.empty_next(1);

        let result = h.cycle("R1").await;
        assert_eq!(result.decision, Some(Decision::ExtractNew));
        assert_eq!(result.error.as_deref(), Some("extraction produced no artifacts"));
        assert!(!result.extracted());
        let state = h.state("R1");
        assert!(!state.artifacts_extracted);
        assert_eq!(state.extraction_count, 0);
        assert_eq!(state.consecutive_errors, 1);
        assert_eq!(state.extractions_failed, 1);
        assert!(h.snapshots.get("R1").unwrap().is_none());

        h.later(1);
        let retried = h.cycle("R1").await;
        assert_eq!(retried.decision, Some(Decision::ExtractNew));
        assert!(retried.extracted());
        assert_eq!(h.state("R1").consecutive_errors, 0);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_cycle() {
        let h = harness(config());
        for id in ["R1", "R2", "R3"] {
            h.tracker.set(id, "Add login", "Users sign in with email", "New");
        }
        h.tracker.fail_fetches("R2", 1);

        let ids = ["R1", "R2", "R3"].map(String::from);
        let results = h.orch.run_cycle(&ids).await;
        assert_eq!(results.len(), 3);
        assert!(results["R1"].extracted());
        assert!(results["R3"].extracted());
        assert!(results["R2"].error.is_some());
        assert!(!results["R2"].extracted());

        assert_eq!(h.state("R2").consecutive_errors, 1);
        assert!(!h.state("R2").artifacts_extracted);
        assert_eq!(h.state("R1").consecutive_errors, 0);
        assert_eq!(h.state("R3").extraction_count, 1);
        let mut calls = h.extractor.calls();
        calls.sort();
        assert_eq!(calls, vec!["R1", "R3"]);
    }

    #[tokio::test]
    async fn retry_policy_absorbs_transient_failures() {
        let h = harness(MonitorConfig {
            retry: RetryPolicy {
                attempts: 3,
                delay: Duration::ZERO,
                backoff: Backoff::Fixed,
            },
            ..config()
        });
        h.tracker.set("R1", "Add login", "", "New");
        h.extractor.fail_next(2);

        let result = h.cycle("R1").await;
        assert!(result.extracted());
        assert_eq!(h.extractor.call_count(), 3);
        assert_eq!(h.state("R1").consecutive_errors, 0);
    }

    #[tokio::test]
    async fn fetch_failures_flag_but_keep_monitoring() {
        let h = harness(config());
        h.tracker.set("R1", "Add login", "", "New");
        h.tracker.fail_fetches("R1", 3);

        for _ in 0..3 {
            let result = h.cycle("R1").await;
            assert!(result.error.is_some());
            assert_eq!(result.decision, None);
        }
        assert_eq!(h.state("R1").consecutive_errors, 3);
        assert_eq!(h.orch.statistics().unwrap().flagged, 1);
        assert_eq!(h.orch.monitored_ids().unwrap(), vec!["R1"]);

        let result = h.cycle("R1").await;
        assert_eq!(result.decision, Some(Decision::ExtractNew));
        assert_eq!(h.state("R1").consecutive_errors, 0);
    }

    #[tokio::test]
    async fn not_found_changes_nothing() {
        let h = harness(config());
        let result = h.cycle("GONE").await;
        assert!(result.not_found);
        assert_eq!(result.decision, None);
        assert!(h.states.get("GONE").unwrap().is_none());
    }

    #[tokio::test]
    async fn deleted_upstream_keeps_local_records() {
        let h = extracted(config()).await;
        let before = h.state("R1");
        h.tracker.remove("R1");

        let result = h.cycle("R1").await;
        assert!(result.not_found);
        assert_eq!(h.state("R1"), before);
        assert_eq!(h.baseline("R1").title, "Add login");
    }

    struct FlakyStates {
        inner: MemoryStore<RequirementProcessingState>,
        fail: Arc<AtomicBool>,
    }

    impl KeyedStore<RequirementProcessingState> for FlakyStates {
        fn get(&self, id: &str) -> Result<Option<RequirementProcessingState>, StoreError> {
            self.inner.get(id)
        }

        fn put(&self, id: &str, value: &RequirementProcessingState) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Other("disk full".into()));
            }
            self.inner.put(id, value)
        }

        fn delete(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }

        fn ids(&self) -> Result<Vec<String>, StoreError> {
            self.inner.ids()
        }
    }

    #[tokio::test]
    async fn failed_state_write_rolls_back_snapshot() {
        let fail = Arc::new(AtomicBool::new(false));
        let states = StateTracker::new(FlakyStates {
            inner: MemoryStore::new(),
            fail: fail.clone(),
        });
        let h = harness_with(config(), SnapshotStore::in_memory(), states);
        h.tracker.set("R1", "Add login", "Users sign in with email", "New");
        h.cycle("R1").await;

        rewrite(&h);
        h.later(2);
        fail.store(true, Ordering::SeqCst);
        let result = h.cycle("R1").await;
        assert!(result.error.is_some());
        assert_eq!(h.baseline("R1").title, "Add login");
        assert_eq!(h.state("R1").extraction_count, 1);
    }

    #[tokio::test]
    async fn failed_first_write_leaves_no_snapshot() {
        let fail = Arc::new(AtomicBool::new(true));
        let states = StateTracker::new(FlakyStates {
            inner: MemoryStore::new(),
            fail,
        });
        let h = harness_with(config(), SnapshotStore::in_memory(), states);
        h.tracker.set("R1", "Add login", "", "New");

        let result = h.cycle("R1").await;
        assert!(result.error.is_some());
        assert!(h.snapshots.get("R1").unwrap().is_none());
    }

    // ── Self-healing and configuration switches ──

    #[tokio::test]
    async fn existing_children_are_adopted() {
        let h = harness(config());
        h.tracker.set("R1", "Add login", "", "New");
        h.tracker.add_child("R1");

        let result = h.orch.add_requirement("R1").await.unwrap();
        assert_eq!(result.decision, Some(Decision::Skip));
        assert_eq!(result.skip_reason, Some(SkipReason::ExistingArtifacts));
        assert_eq!(h.extractor.call_count(), 0);

        let state = h.state("R1");
        assert!(state.artifacts_extracted);
        assert_eq!(state.extraction_count, 1);
        assert_eq!(state.last_extraction_at, None);

        let again = h.cycle("R1").await;
        assert_eq!(again.skip_reason, Some(SkipReason::Unchanged));
    }

    #[tokio::test]
    async fn skip_duplicate_check_extracts_anyway() {
        let h = harness(MonitorConfig {
            skip_duplicate_check: true,
            ..config()
        });
        h.tracker.set("R1", "Add login", "", "New");
        h.tracker.add_child("R1");

        let result = h.orch.add_requirement("R1").await.unwrap();
        assert_eq!(result.decision, Some(Decision::ExtractNew));
        assert_eq!(h.extractor.call_count(), 1);
    }

    #[tokio::test]
    async fn auto_extract_disabled_still_records_snapshot() {
        let h = harness(MonitorConfig {
            auto_extract_new: false,
            ..config()
        });
        h.tracker.set("R1", "Add login", "", "New");

        let result = h.cycle("R1").await;
        assert_eq!(result.skip_reason, Some(SkipReason::AutoExtractDisabled));
        assert_eq!(h.extractor.call_count(), 0);
        assert!(!h.state("R1").artifacts_extracted);
        assert_eq!(h.baseline("R1").title, "Add login");
    }

    #[tokio::test]
    async fn config_change_applies_next_cycle() {
        let h = extracted(config()).await;
        h.tracker.set("R1", "Add login", "Users sign in with email", "Active");
        h.later(2);
        h.orch.set_config(MonitorConfig {
            significance_threshold: 0.1,
            ..config()
        });

        let result = h.cycle("R1").await;
        assert_eq!(result.decision, Some(Decision::ExtractOnChange));
    }

    // ── Manual triggers ──

    #[tokio::test]
    async fn force_extract_bypasses_cooldown() {
        let h = extracted(config()).await;
        h.clock.advance(TimeDelta::minutes(1));

        let result = h.orch.force_extract("R1").await.unwrap();
        assert_eq!(result.decision, Some(Decision::ForceExtract));
        assert!(result.extracted());

        let state = h.state("R1");
        assert_eq!(state.extraction_count, 2);
        assert_eq!(state.change_extraction_count, 0);
        assert_eq!(
            state.change_history.back().unwrap().trigger,
            Trigger::ManualOverride
        );
    }

    #[tokio::test]
    async fn force_extract_respects_override_flag() {
        let h = extracted(MonitorConfig {
            manual_override_enabled: false,
            ..config()
        })
        .await;
        let err = h.orch.force_extract("R1").await.unwrap_err();
        assert!(matches!(err, SyncError::ManualOverrideDisabled(_)));
        assert_eq!(h.extractor.call_count(), 1);
    }

    #[tokio::test]
    async fn manual_triggers_need_monitored_id() {
        let h = harness(config());
        h.tracker.set("R9", "t", "d", "New");
        assert!(matches!(
            h.orch.force_extract("R9").await,
            Err(SyncError::NotMonitored(_))
        ));
        assert!(matches!(
            h.orch.force_check("R9").await,
            Err(SyncError::NotMonitored(_))
        ));
        assert_eq!(h.extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn configured_ids_are_monitored() {
        let h = harness(MonitorConfig {
            requirement_ids: vec!["R2".into()],
            ..config()
        });
        h.tracker.set("R2", "t", "d", "New");
        assert_eq!(h.orch.monitored_ids().unwrap(), vec!["R2"]);
        let result = h.orch.force_check("R2").await.unwrap();
        assert_eq!(result.decision, Some(Decision::ExtractNew));
    }

    #[tokio::test]
    async fn force_reset_extracts_again() {
        let h = extracted(config()).await;
        rewrite(&h);
        h.later(2);
        h.cycle("R1").await;
        assert_eq!(h.state("R1").extraction_count, 2);

        let result = h.orch.force_reset("R1").await.unwrap();
        assert_eq!(result.decision, Some(Decision::ExtractNew));
        let state = h.state("R1");
        assert_eq!(state.extraction_count, 1);
        assert_eq!(state.change_extraction_count, 0);
        assert_eq!(h.extractor.call_count(), 3);
    }

    // ── Monitoring set ──

    #[tokio::test]
    async fn remove_requirement_deletes_records() {
        let h = extracted(config()).await;
        assert!(h.orch.remove_requirement("R1").await.unwrap());
        assert!(h.states.get("R1").unwrap().is_none());
        assert!(h.snapshots.get("R1").unwrap().is_none());
        assert!(!h.orch.remove_requirement("R1").await.unwrap());
    }

    #[tokio::test]
    async fn add_requirement_rejects_blank_id() {
        let h = harness(config());
        assert!(matches!(
            h.orch.add_requirement("  ").await,
            Err(SyncError::EmptyId)
        ));
    }

    #[tokio::test]
    async fn discover_lists_unmonitored() {
        let h = harness(config());
        for id in ["R1", "R2", "R3"] {
            h.tracker.set(id, "t", "d", "New");
        }
        h.orch.add_requirement("R1").await.unwrap();
        let found = h.orch.discover(&RequirementFilter::default()).await.unwrap();
        assert_eq!(found, vec!["R2", "R3"]);
    }

    #[tokio::test]
    async fn parallel_cycle_checks_each_id_once() {
        let h = harness(MonitorConfig {
            max_concurrent_syncs: 4,
            ..config()
        });
        for id in ["R1", "R2", "R3", "R4", "R5"] {
            h.tracker.set(id, &format!("title {id}"), "", "New");
        }
        let ids: Vec<String> = ["R1", "R2", "R1", " R3 ", "R2", "R4", "R5", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let results = h.orch.run_cycle(&ids).await;
        assert_eq!(
            results.keys().cloned().collect::<Vec<_>>(),
            vec!["R1", "R2", "R3", "R4", "R5"]
        );
        let mut calls = h.extractor.calls();
        calls.sort();
        assert_eq!(calls, vec!["R1", "R2", "R3", "R4", "R5"]);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn operation_futures_are_send() {
        let h = harness(config());
        let ids = vec!["R1".to_string()];
        let token = CancellationToken::new();
        assert_send(&h.orch.run_cycle(&ids));
        assert_send(&h.orch.run_cycle_until(&ids, &token));
        assert_send(&h.orch.run_monitored(&token));
        assert_send(&h.orch.force_check("R1"));
        assert_send(&h.orch.force_extract("R1"));
        assert_send(&h.orch.force_reset("R1"));
        assert_send(&h.orch.add_requirement("R1"));
    }

    // ── Statistics and persistence ──

    #[tokio::test]
    async fn statistics_follow_cycles() {
        let h = extracted(config()).await;
        h.tracker.set("R2", "Other", "", "New");
        h.extractor.fail_next(1);
        h.cycle("R2").await;

        let stats = h.orch.statistics().unwrap();
        assert_eq!(stats.total_monitored, 2);
        assert_eq!(stats.total_extracted, 1);
        assert_eq!(stats.extractions_succeeded, 1);
        assert_eq!(stats.extractions_failed, 1);
        assert_eq!(stats.success_rate, Some(0.5));

        let r1 = h.orch.requirement_statistics("R1").unwrap().unwrap();
        assert_eq!(r1.extraction_count, 1);
        assert_eq!(r1.recent_changes.len(), 1);
        assert!(h.orch.requirement_statistics("R9").unwrap().is_none());
    }

    #[tokio::test]
    async fn attempt_counts_survive_restart() {
        let tmp = TempDir::new().unwrap();
        let h = harness_with(
            config(),
            SnapshotStore::open(tmp.path()).unwrap(),
            StateTracker::open(tmp.path()).unwrap(),
        );
        h.tracker.set("R1", "Add login", "Users sign in with email", "New");
        h.tracker.set("R2", "Export reports", "CSV and PDF", "New");
        h.extractor.fail_next(1);
        h.cycle("R2").await;
        h.cycle("R1").await;
        drop(h);

        let reopened = harness_with(
            config(),
            SnapshotStore::open(tmp.path()).unwrap(),
            StateTracker::open(tmp.path()).unwrap(),
        );
        let stats = reopened.orch.statistics().unwrap();
        assert_eq!(stats.extractions_succeeded, 1);
        assert_eq!(stats.extractions_failed, 1);
        assert_eq!(stats.success_rate, Some(0.5));
        let r2 = reopened.orch.requirement_statistics("R2").unwrap().unwrap();
        assert_eq!(r2.extractions_failed, 1);
    }

    #[tokio::test]
    async fn restart_restores_decisions() {
        let tmp = TempDir::new().unwrap();
        let h = harness_with(
            config(),
            SnapshotStore::open(tmp.path()).unwrap(),
            StateTracker::open(tmp.path()).unwrap(),
        );
        h.tracker.set("R1", "Add login", "Users sign in with email", "New");
        h.cycle("R1").await;
        let before = h.state("R1");
        drop(h);

        let reopened = harness_with(
            config(),
            SnapshotStore::new(JsonDirStore::open(tmp.path().join("snapshots")).unwrap()),
            StateTracker::open(tmp.path()).unwrap(),
        );
        assert_eq!(reopened.state("R1"), before);
        reopened
            .tracker
            .set("R1", "Add login", "Users sign in with email", "New");
        let result = reopened.cycle("R1").await;
        assert_eq!(result.skip_reason, Some(SkipReason::Unchanged));
        assert_eq!(reopened.extractor.call_count(), 0);
    }
}
