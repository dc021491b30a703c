//! Requirement snapshots, content fingerprints, and exact field diffs.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Observed content of a requirement at a point in time.
///
/// Snapshots are never edited in place. The stored baseline for a requirement
/// is replaced wholesale when its content has been extracted or adopted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementSnapshot {
    pub requirement_id: String,
    pub title: String,
    pub description: String,
    /// Tracker-defined workflow state, e.g. "New" or "In Progress".
    pub state: String,
    #[serde(default)]
    pub priority: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl RequirementSnapshot {
    /// Snapshot captured now, without a priority.
    pub fn new(
        requirement_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self {
            requirement_id: requirement_id.into(),
            title: title.into(),
            description: description.into(),
            state: state.into(),
            priority: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn captured(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }

    /// Content fingerprint of this snapshot. See [`fingerprint`].
    pub fn fingerprint(&self) -> ContentHash {
        fingerprint(self)
    }

    fn priority_str(&self) -> &str {
        self.priority.as_deref().unwrap_or("")
    }
}

/// Hex-encoded SHA-256 digest of a snapshot's content fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic digest over title, description, state, and priority.
///
/// A missing priority hashes the same as an empty one. Each field is
/// length-prefixed, so moving text across a field boundary changes the hash.
/// `captured_at` and `requirement_id` do not take part: two snapshots with
/// equal content fields are identical for monitoring purposes.
pub fn fingerprint(snapshot: &RequirementSnapshot) -> ContentHash {
    let mut hasher = Sha256::new();
    for field in [
        snapshot.title.as_str(),
        snapshot.description.as_str(),
        snapshot.state.as_str(),
        snapshot.priority_str(),
    ] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    ContentHash(format!("{:x}", hasher.finalize()))
}

/// A content field of a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Description,
    State,
    Priority,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::State => "state",
            Self::Priority => "priority",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field exact inequality between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldDiff {
    pub title_changed: bool,
    pub description_changed: bool,
    pub state_changed: bool,
    pub priority_changed: bool,
}

impl FieldDiff {
    /// True when no field differs.
    pub fn is_empty(&self) -> bool {
        !(self.title_changed || self.description_changed || self.state_changed || self.priority_changed)
    }

    /// State and priority share one significance bucket.
    pub fn state_bucket_changed(&self) -> bool {
        self.state_changed || self.priority_changed
    }

    pub fn fields(&self) -> BTreeSet<Field> {
        [
            (self.title_changed, Field::Title),
            (self.description_changed, Field::Description),
            (self.state_changed, Field::State),
            (self.priority_changed, Field::Priority),
        ]
        .into_iter()
        .filter_map(|(changed, field)| changed.then_some(field))
        .collect()
    }
}

/// Exact string comparison of each content field. No fuzzy matching here.
pub fn diff(old: &RequirementSnapshot, new: &RequirementSnapshot) -> FieldDiff {
    FieldDiff {
        title_changed: old.title != new.title,
        description_changed: old.description != new.description,
        state_changed: old.state != new.state,
        priority_changed: old.priority_str() != new.priority_str(),
    }
}
