//! Re-extraction decision engine.
//!
//! Pure function of the requirement's processing state, the detected change,
//! the configuration, and the current time. It never touches storage: the
//! orchestrator applies the returned [`Verdict`] only after the extraction it
//! asks for has actually completed.
//!
//! ```text
//! UNSEEN ──observe──▶ SEEN_UNEXTRACTED ──extract──▶ EXTRACTED
//!                                                    │    ▲
//!                                      change ≥ threshold, re-extract
//!                                                    ▼    │
//!                                              EXTRACTED_CHANGED
//! ```

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MonitorConfig;
use crate::state::RequirementProcessingState;

/// What to do with a requirement this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Skip,
    ExtractNew,
    ExtractOnChange,
    ForceExtract,
}

impl Decision {
    pub fn requires_extraction(&self) -> bool {
        !matches!(self, Self::Skip)
    }

    /// Change-triggered extractions count against the per-requirement cap.
    pub fn is_change_based(&self) -> bool {
        matches!(self, Self::ExtractOnChange)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::ExtractNew => "extract-new",
            Self::ExtractOnChange => "extract-on-change",
            Self::ForceExtract => "force-extract",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a requirement was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Fingerprint matches the baseline.
    Unchanged,
    AutoExtractDisabled,
    /// Child artifacts already exist upstream; adopted instead of extracted.
    ExistingArtifacts,
    /// Extracted requirement without a stored baseline; the current content
    /// becomes the baseline.
    NoBaseline,
    ChangeExtractionDisabled,
    BelowThreshold,
    CapReached,
    CoolingDown,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::AutoExtractDisabled => "auto-extract-disabled",
            Self::ExistingArtifacts => "existing-artifacts",
            Self::NoBaseline => "no-baseline",
            Self::ChangeExtractionDisabled => "change-extraction-disabled",
            Self::BelowThreshold => "below-threshold",
            Self::CapReached => "cap-reached",
            Self::CoolingDown => "cooling-down",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase derived from the processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unseen,
    SeenUnextracted,
    Extracted,
}

impl Phase {
    pub fn of(state: Option<&RequirementProcessingState>) -> Self {
        match state {
            None => Self::Unseen,
            Some(s) if s.artifacts_extracted => Self::Extracted,
            Some(_) => Self::SeenUnextracted,
        }
    }
}

/// Content change relative to the stored baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Change {
    NoBaseline,
    Unchanged,
    Changed { score: f64 },
}

/// Engine output: the decision plus what the orchestrator must record with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub skip_reason: Option<SkipReason>,
    /// Mark the requirement extracted without running extraction.
    pub adopt_existing: bool,
}

impl Verdict {
    fn extract(decision: Decision) -> Self {
        Self {
            decision,
            skip_reason: None,
            adopt_existing: false,
        }
    }

    fn skip(reason: SkipReason) -> Self {
        Self {
            decision: Decision::Skip,
            skip_reason: Some(reason),
            adopt_existing: reason == SkipReason::ExistingArtifacts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("manual override is disabled")]
pub struct ManualOverrideDisabled;

/// Inputs for one decision.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub state: Option<&'a RequirementProcessingState>,
    pub change: Change,
    /// Outcome of the upstream duplicate check, when one was made.
    pub existing_artifacts: Option<bool>,
    pub now: DateTime<Utc>,
}

/// Decision engine bound to one cycle's configuration.
#[derive(Debug, Clone, Copy)]
pub struct DecisionEngine<'a> {
    config: &'a MonitorConfig,
}

impl<'a> DecisionEngine<'a> {
    pub fn new(config: &'a MonitorConfig) -> Self {
        Self { config }
    }

    /// Whether [`decide`](Self::decide) will look at `existing_artifacts`.
    /// Lets the caller skip the tracker round-trip when it will not.
    pub fn needs_duplicate_check(&self, state: Option<&RequirementProcessingState>) -> bool {
        Phase::of(state) == Phase::SeenUnextracted
            && self.config.auto_extract_new
            && !self.config.skip_duplicate_check
    }

    pub fn decide(&self, input: DecisionInput<'_>) -> Verdict {
        match Phase::of(input.state) {
            Phase::Unseen => self.decide_new(),
            Phase::SeenUnextracted => {
                if !self.config.auto_extract_new {
                    return Verdict::skip(SkipReason::AutoExtractDisabled);
                }
                if !self.config.skip_duplicate_check && input.existing_artifacts == Some(true) {
                    return Verdict::skip(SkipReason::ExistingArtifacts);
                }
                Verdict::extract(Decision::ExtractNew)
            }
            Phase::Extracted => match (input.state, input.change) {
                (_, Change::NoBaseline) => Verdict::skip(SkipReason::NoBaseline),
                (_, Change::Unchanged) => Verdict::skip(SkipReason::Unchanged),
                (Some(state), Change::Changed { score }) => {
                    self.decide_on_change(state, score, input.now)
                }
                (None, Change::Changed { .. }) => self.decide_new(),
            },
        }
    }

    /// Operator-requested extraction. Bypasses threshold, cap, and cooldown.
    pub fn manual_override(&self) -> Result<Verdict, ManualOverrideDisabled> {
        if self.config.manual_override_enabled {
            Ok(Verdict::extract(Decision::ForceExtract))
        } else {
            Err(ManualOverrideDisabled)
        }
    }

    fn decide_new(&self) -> Verdict {
        if self.config.auto_extract_new {
            Verdict::extract(Decision::ExtractNew)
        } else {
            Verdict::skip(SkipReason::AutoExtractDisabled)
        }
    }

    fn decide_on_change(
        &self,
        state: &RequirementProcessingState,
        score: f64,
        now: DateTime<Utc>,
    ) -> Verdict {
        if !self.config.enable_change_based_extraction {
            return Verdict::skip(SkipReason::ChangeExtractionDisabled);
        }
        if score < self.config.significance_threshold {
            return Verdict::skip(SkipReason::BelowThreshold);
        }
        if self.cap_reached(state) {
            return Verdict::skip(SkipReason::CapReached);
        }
        if self.cooling_down(state, now) {
            return Verdict::skip(SkipReason::CoolingDown);
        }
        Verdict::extract(Decision::ExtractOnChange)
    }

    fn cap_reached(&self, state: &RequirementProcessingState) -> bool {
        let cap = self.config.max_changes_per_requirement;
        cap != 0 && state.change_extraction_count >= cap
    }

    fn cooling_down(&self, state: &RequirementProcessingState, now: DateTime<Utc>) -> bool {
        let Some(last) = state.last_extraction_at else {
            return false;
        };
        match TimeDelta::from_std(self.config.cooldown) {
            Ok(cooldown) => now < last + cooldown,
            // Validated at load; an unrepresentable cooldown never elapses.
            Err(_) => true,
        }
    }
}
