//! Change-significance scoring.
//!
//! Combines per-field changes into one score in `[0, 1]`:
//!
//! - title: `(1 - similarity) * weight.title`
//! - description: `(1 - similarity) * weight.description`
//! - state or priority changed: `weight.state`, counted once for both
//!
//! The sum is clamped to `[0, 1]`. A requirement with no baseline scores 1.0.

use std::time::Duration;

use similar::{Algorithm, TextDiff};

use crate::config::FieldWeights;
use crate::snapshot::{FieldDiff, RequirementSnapshot, diff};

/// Upper bound on time spent diffing one pair of texts. Past the deadline the
/// diff degrades to a coarser match, which can only lower the similarity.
const DIFF_DEADLINE: Duration = Duration::from_millis(200);

/// Normalized character-level similarity: `2 * matched / (len(a) + len(b))`.
///
/// 1.0 for identical text (including two empty strings), 0.0 when exactly one
/// side is empty.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let ratio = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .timeout(DIFF_DEADLINE)
        .diff_chars(a, b)
        .ratio();
    f64::from(ratio).clamp(0.0, 1.0)
}

/// Result of scoring one snapshot against its baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub score: f64,
    pub diff: FieldDiff,
}

/// Weighted change scorer.
#[derive(Debug, Clone, Copy)]
pub struct Scorer {
    weights: FieldWeights,
}

impl Scorer {
    pub fn new(weights: FieldWeights) -> Self {
        Self { weights }
    }

    /// Significance of `new` relative to `old`, in `[0, 1]`.
    pub fn score(&self, old: Option<&RequirementSnapshot>, new: &RequirementSnapshot) -> f64 {
        match old {
            Some(old) => self.assess(old, new).score,
            None => 1.0,
        }
    }

    /// Score plus the field diff it was computed from.
    pub fn assess(&self, old: &RequirementSnapshot, new: &RequirementSnapshot) -> Assessment {
        let diff = diff(old, new);
        let mut total = 0.0;

        if diff.title_changed {
            total += (1.0 - text_similarity(&old.title, &new.title)) * self.weights.title;
        }
        if diff.description_changed {
            total += (1.0 - text_similarity(&old.description, &new.description))
                * self.weights.description;
        }
        if diff.state_bucket_changed() {
            total += self.weights.state;
        }

        Assessment {
            score: total.clamp(0.0, 1.0),
            diff,
        }
    }
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(FieldWeights::default())
    }
}
