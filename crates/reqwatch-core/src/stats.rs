//! Read-only statistics over the processing state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{ChangeRecord, ErrorRecord, RequirementProcessingState};

/// Number of recent changes included in per-requirement statistics.
pub const RECENT_CHANGES: usize = 5;

/// Monitor-wide summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatistics {
    pub total_monitored: usize,
    pub total_extracted: usize,
    /// Sum of `extraction_count` across all requirements.
    pub total_extractions: u64,
    /// Sum of `change_extraction_count` across all requirements.
    pub total_change_extractions: u64,
    /// Sum of change history lengths.
    pub total_changes_recorded: usize,
    /// Requirements with at least one change record.
    pub requirements_with_changes: usize,
    pub flagged: usize,
    pub average_extractions_per_requirement: f64,
    /// Committed extraction attempts, summed from the stored states.
    pub extractions_succeeded: u64,
    /// Failed extraction attempts, summed from the stored states.
    pub extractions_failed: u64,
    /// `succeeded / (succeeded + failed)`, or `None` before any attempt.
    pub success_rate: Option<f64>,
}

impl MonitorStatistics {
    pub fn aggregate<'a>(
        states: impl IntoIterator<Item = &'a RequirementProcessingState>,
        flag_threshold: u32,
    ) -> Self {
        let mut total_monitored = 0;
        let mut total_extracted = 0;
        let mut total_extractions = 0u64;
        let mut total_change_extractions = 0u64;
        let mut total_changes_recorded = 0;
        let mut requirements_with_changes = 0;
        let mut flagged = 0;
        let mut extractions_succeeded = 0u64;
        let mut extractions_failed = 0u64;

        for state in states {
            total_monitored += 1;
            if state.artifacts_extracted {
                total_extracted += 1;
            }
            total_extractions += u64::from(state.extraction_count);
            total_change_extractions += u64::from(state.change_extraction_count);
            total_changes_recorded += state.change_history.len();
            if !state.change_history.is_empty() {
                requirements_with_changes += 1;
            }
            if state.is_flagged(flag_threshold) {
                flagged += 1;
            }
            extractions_succeeded += u64::from(state.extractions_succeeded);
            extractions_failed += u64::from(state.extractions_failed);
        }

        let average_extractions_per_requirement = if total_monitored == 0 {
            0.0
        } else {
            total_extractions as f64 / total_monitored as f64
        };
        let attempts = extractions_succeeded + extractions_failed;
        let success_rate = (attempts > 0).then(|| extractions_succeeded as f64 / attempts as f64);

        Self {
            total_monitored,
            total_extracted,
            total_extractions,
            total_change_extractions,
            total_changes_recorded,
            requirements_with_changes,
            flagged,
            average_extractions_per_requirement,
            extractions_succeeded,
            extractions_failed,
            success_rate,
        }
    }
}

/// Summary for one requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementStatistics {
    pub requirement_id: String,
    pub artifacts_extracted: bool,
    pub extraction_count: u32,
    pub change_extraction_count: u32,
    pub total_changes: usize,
    pub last_significance: f64,
    pub last_extraction_at: Option<DateTime<Utc>>,
    pub last_change: Option<ChangeRecord>,
    /// Up to [`RECENT_CHANGES`] records, oldest first.
    pub recent_changes: Vec<ChangeRecord>,
    pub consecutive_errors: u32,
    pub last_error: Option<ErrorRecord>,
    pub flagged: bool,
    pub extractions_succeeded: u32,
    pub extractions_failed: u32,
}

impl RequirementStatistics {
    pub fn from_state(state: &RequirementProcessingState, flag_threshold: u32) -> Self {
        Self {
            requirement_id: state.requirement_id.clone(),
            artifacts_extracted: state.artifacts_extracted,
            extraction_count: state.extraction_count,
            change_extraction_count: state.change_extraction_count,
            total_changes: state.change_history.len(),
            last_significance: state.last_significance,
            last_extraction_at: state.last_extraction_at,
            last_change: state.change_history.back().cloned(),
            recent_changes: state.recent_changes(RECENT_CHANGES).cloned().collect(),
            consecutive_errors: state.consecutive_errors,
            last_error: state.last_error.clone(),
            flagged: state.is_flagged(flag_threshold),
            extractions_succeeded: state.extractions_succeeded,
            extractions_failed: state.extractions_failed,
        }
    }
}
