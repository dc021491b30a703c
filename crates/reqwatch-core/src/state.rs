//! Per-requirement processing state and its bounded change history.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::snapshot::{ContentHash, Field};

/// What caused a change record to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    Automatic,
    ManualOverride,
}

/// One detected change between a requirement's baseline and its current content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub from_hash: Option<ContentHash>,
    pub to_hash: ContentHash,
    pub significance: f64,
    pub detected_at: DateTime<Utc>,
    pub trigger: Trigger,
    pub fields_changed: BTreeSet<Field>,
    pub decision: Decision,
}

impl ChangeRecord {
    /// Same transition with the same outcome; repeated polls of an unchanged
    /// pending edit collapse into one entry.
    fn repeats(&self, other: &ChangeRecord) -> bool {
        self.from_hash == other.from_hash
            && self.to_hash == other.to_hash
            && self.trigger == other.trigger
            && self.decision == other.decision
    }
}

/// Most recent failure for a requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Everything the monitor remembers about one requirement.
///
/// Invariants: `artifacts_extracted` implies `extraction_count >= 1`, and the
/// counters only go down through [`reset`](Self::reset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementProcessingState {
    pub requirement_id: String,
    pub artifacts_extracted: bool,
    pub extraction_count: u32,
    /// Extractions triggered by content changes. The per-requirement cap
    /// applies to this counter.
    #[serde(default)]
    pub change_extraction_count: u32,
    pub last_extraction_at: Option<DateTime<Utc>>,
    pub last_significance: f64,
    pub change_history: VecDeque<ChangeRecord>,
    pub consecutive_errors: u32,
    #[serde(default)]
    pub last_error: Option<ErrorRecord>,
    pub added_at: DateTime<Utc>,
    /// Last check that wrote this record. A check that finds an extracted
    /// requirement unchanged leaves it untouched.
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Extraction attempts that committed. Kept across [`reset`](Self::reset).
    #[serde(default)]
    pub extractions_succeeded: u32,
    /// Extraction attempts that failed after retries. Kept across resets.
    #[serde(default)]
    pub extractions_failed: u32,
}

impl RequirementProcessingState {
    pub fn new(requirement_id: impl Into<String>, added_at: DateTime<Utc>) -> Self {
        Self {
            requirement_id: requirement_id.into(),
            artifacts_extracted: false,
            extraction_count: 0,
            change_extraction_count: 0,
            last_extraction_at: None,
            last_significance: 0.0,
            change_history: VecDeque::new(),
            consecutive_errors: 0,
            last_error: None,
            added_at,
            last_checked_at: None,
            extractions_succeeded: 0,
            extractions_failed: 0,
        }
    }

    /// Append a change record, evicting the oldest beyond `limit`.
    ///
    /// Returns `false` when the record repeats the latest entry and was dropped.
    pub fn record_change(&mut self, record: ChangeRecord, limit: usize) -> bool {
        self.last_significance = record.significance;
        if self
            .change_history
            .back()
            .is_some_and(|last| last.repeats(&record))
        {
            return false;
        }
        self.change_history.push_back(record);
        while self.change_history.len() > limit.max(1) {
            self.change_history.pop_front();
        }
        true
    }

    /// A completed extraction. Clears the error streak.
    pub fn record_extraction(&mut self, at: DateTime<Utc>, change_based: bool) {
        self.artifacts_extracted = true;
        self.extraction_count = self.extraction_count.saturating_add(1);
        if change_based {
            self.change_extraction_count = self.change_extraction_count.saturating_add(1);
        }
        self.last_extraction_at = Some(at);
        self.extractions_succeeded = self.extractions_succeeded.saturating_add(1);
        self.clear_errors();
    }

    /// Child artifacts already exist upstream although this state never saw an
    /// extraction (lost state, or artifacts created by hand). Adopt them so
    /// they are not generated a second time. The count is raised to 1 to keep
    /// the extracted-implies-counted invariant; `last_extraction_at` stays
    /// untouched so no cooldown starts.
    pub fn adopt_existing(&mut self) {
        self.artifacts_extracted = true;
        self.extraction_count = self.extraction_count.max(1);
        self.clear_errors();
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>, message: impl Into<String>) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.last_error = Some(ErrorRecord {
            at,
            message: message.into(),
        });
    }

    /// An extraction that produced nothing usable. Extraction counts and the
    /// baseline stay as they were.
    pub fn record_extraction_failure(&mut self, at: DateTime<Utc>, message: impl Into<String>) {
        self.extractions_failed = self.extractions_failed.saturating_add(1);
        self.record_failure(at, message);
    }

    pub fn clear_errors(&mut self) {
        self.consecutive_errors = 0;
        self.last_error = None;
    }

    /// Flagged requirements stay monitored; the flag is informational.
    pub fn is_flagged(&self, threshold: u32) -> bool {
        self.consecutive_errors >= threshold
    }

    /// Explicit manual reset: forget extractions so the next check treats the
    /// requirement as never extracted. History is kept for auditing.
    pub fn reset(&mut self) {
        self.artifacts_extracted = false;
        self.extraction_count = 0;
        self.change_extraction_count = 0;
        self.last_extraction_at = None;
        self.last_significance = 0.0;
        self.clear_errors();
    }

    /// Most recent `n` change records, oldest first.
    pub fn recent_changes(&self, n: usize) -> impl Iterator<Item = &ChangeRecord> {
        let skip = self.change_history.len().saturating_sub(n);
        self.change_history.iter().skip(skip)
    }
}
