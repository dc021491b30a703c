//! Derived artifacts: the child work items generated from a requirement.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of child item derived from a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    UserStory,
    TestCase,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserStory => "user-story",
            Self::TestCase => "test-case",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated artifact that has not been written to the tracker yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftArtifact {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

/// What the extraction collaborator reports back for one requirement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// Tracker IDs of created artifacts (empty when not uploading).
    pub created: Vec<String>,
    /// Number of artifacts generated, uploaded or not.
    #[serde(default)]
    pub generated: usize,
    /// Per-artifact failures that did not abort the whole extraction.
    pub errors: Vec<String>,
}

impl ExtractionOutcome {
    /// An outcome counts as completed work when it produced something: at
    /// least one created artifact when uploading, at least one generated
    /// artifact otherwise. Partial success counts, so artifacts already
    /// created are not created again.
    pub fn is_success(&self, upload: bool) -> bool {
        if upload {
            !self.created.is_empty()
        } else {
            self.generated > 0
        }
    }
}
